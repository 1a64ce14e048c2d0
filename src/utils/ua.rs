/// User-agent classification for the access log. Ordered table matching:
/// Edge claims to be Chrome, Chrome claims to be Safari, so check order is
/// Edge -> Chrome -> Safari -> Firefox -> Opera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

pub fn parse_user_agent(ua: &str) -> ParsedUserAgent {
    ParsedUserAgent {
        browser: detect_browser(ua).to_string(),
        os: detect_os(ua).to_string(),
        device_type: detect_device_type(ua).to_string(),
    }
}

fn detect_browser(ua: &str) -> &'static str {
    if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        // Opera also carries "Chrome/": test before the generic Chrome match
        "Opera"
    } else if ua.contains("Chrome/") || ua.contains("CriOS") {
        "Chrome"
    } else if ua.contains("Safari/") && ua.contains("Version/") {
        "Safari"
    } else if ua.contains("Firefox/") || ua.contains("FxiOS") {
        "Firefox"
    } else {
        "Other"
    }
}

fn detect_os(ua: &str) -> &'static str {
    if ua.contains("Windows NT 10.0") {
        // NT 10.0 covers both; Windows 11 UAs are indistinguishable without
        // client hints, so report the ceiling.
        "Windows 10/11"
    } else if ua.contains("Windows NT") {
        "Windows"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        "iOS"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Other"
    }
}

fn detect_device_type(ua: &str) -> &'static str {
    if ua.contains("Tablet") || ua.contains("iPad") {
        "Tablet"
    } else if ua.contains("Mobile") || ua.contains("Android") || ua.contains("iPhone") {
        "Mobile"
    } else {
        "Desktop"
    }
}
