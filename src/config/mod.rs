use std::env;
use std::time::Duration;

/// Runtime configuration for the room backend.
///
/// Every knob has a sane default so `sqlite::memory:` + MinIO on localhost
/// boots with an empty environment. Durations are configurable mostly so the
/// test suite can shrink the burn and destruction timers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Per-room file count cap (default: 100)
    pub room_max_files: i32,

    /// Per-room byte cap (default: 4 GiB)
    pub room_max_total_size_bytes: i64,

    /// Window in which a presence row counts as active (default: 120 s)
    pub active_window: Duration,

    /// Default room capacity; >= 999 means unlimited
    pub default_capacity: i32,

    /// Default room lifetime when the creator gives none (default: 24 h)
    pub default_room_ttl: Duration,

    /// Delay between a successful burn download and blob destruction
    pub burn_delay: Duration,

    /// Countdown between `terminating` and destruction
    pub destruction_countdown: Duration,

    /// Multipart uploads older than this are considered orphaned
    pub stale_upload_age: Duration,

    /// Reaper sweep interval
    pub reaper_interval: Duration,

    /// Signed GET validity for download/preview
    pub download_url_ttl: Duration,

    /// Signed PUT validity for upload parts
    pub upload_url_ttl: Duration,

    /// Access-log in-process dedup window
    pub dedup_ttl: Duration,

    /// Files at or above this size skip the content scan (default: 50 MB)
    pub scan_size_limit: i64,

    /// Overload shedding ceilings
    pub overload_shedding: bool,
    pub max_rss_mb: u64,
    pub min_free_memory_mb: u64,
    pub max_load_per_cpu: f64,

    /// Canonical frontend origin for invite links
    pub frontend_origin: String,

    /// "production" disallows localhost invite origins
    pub environment: String,

    /// Bearer token for the analytics surface; None disables it
    pub admin_token: Option<String>,

    /// Outbound mailer (HTTP JSON API). None falls back to log-only sending.
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,

    /// Geolocation provider endpoint; None disables enrichment
    pub geo_api_url: Option<String>,

    /// CORS origins ("*" allowed, warned about)
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            room_max_files: 100,
            room_max_total_size_bytes: 4 * 1024 * 1024 * 1024,
            active_window: Duration::from_secs(120),
            default_capacity: 999,
            default_room_ttl: Duration::from_secs(24 * 3600),
            burn_delay: Duration::from_secs(3),
            destruction_countdown: Duration::from_secs(30),
            stale_upload_age: Duration::from_secs(24 * 3600),
            reaper_interval: Duration::from_secs(3600),
            download_url_ttl: Duration::from_secs(300),
            upload_url_ttl: Duration::from_secs(3600),
            dedup_ttl: Duration::from_secs(3),
            scan_size_limit: 50 * 1024 * 1024,
            overload_shedding: true,
            max_rss_mb: 2048,
            min_free_memory_mb: 128,
            max_load_per_cpu: 8.0,
            frontend_origin: "https://safeshare.co".to_string(),
            environment: "development".to_string(),
            admin_token: None,
            mail_api_url: None,
            mail_api_key: None,
            mail_from: "SafeShare <no-reply@safeshare.co>".to_string(),
            geo_api_url: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            room_max_files: env_parse("ROOM_MAX_FILES", default.room_max_files),
            room_max_total_size_bytes: env_parse(
                "ROOM_MAX_TOTAL_SIZE_BYTES",
                default.room_max_total_size_bytes,
            ),
            active_window: env_secs("ACTIVE_WINDOW_SECS", default.active_window),
            default_capacity: env_parse("DEFAULT_ROOM_CAPACITY", default.default_capacity),
            default_room_ttl: env_secs("DEFAULT_ROOM_TTL_SECS", default.default_room_ttl),
            burn_delay: env_secs("BURN_DELAY_SECS", default.burn_delay),
            destruction_countdown: env_secs(
                "DESTRUCTION_COUNTDOWN_SECS",
                default.destruction_countdown,
            ),
            stale_upload_age: env_secs("STALE_UPLOAD_AGE_SECS", default.stale_upload_age),
            reaper_interval: env_secs("REAPER_INTERVAL_SECS", default.reaper_interval),
            download_url_ttl: env_secs("DOWNLOAD_URL_TTL_SECS", default.download_url_ttl),
            upload_url_ttl: env_secs("UPLOAD_URL_TTL_SECS", default.upload_url_ttl),
            dedup_ttl: env_secs("DEDUP_TTL_SECS", default.dedup_ttl),
            scan_size_limit: env_parse("SCAN_SIZE_LIMIT", default.scan_size_limit),
            overload_shedding: env::var("OVERLOAD_SHEDDING")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.overload_shedding),
            max_rss_mb: env_parse("MAX_RSS_MB", default.max_rss_mb),
            min_free_memory_mb: env_parse("MIN_FREE_MEMORY_MB", default.min_free_memory_mb),
            max_load_per_cpu: env_parse("MAX_LOAD_PER_CPU", default.max_load_per_cpu),
            frontend_origin: env::var("FRONTEND_ORIGIN").unwrap_or(default.frontend_origin),
            environment: env::var("ENVIRONMENT").unwrap_or(default.environment),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            mail_api_url: env::var("MAIL_API_URL").ok(),
            mail_api_key: env::var("MAIL_API_KEY").ok(),
            mail_from: env::var("MAIL_FROM").unwrap_or(default.mail_from),
            geo_api_url: env::var("GEO_API_URL").ok(),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Origins accepted for client-supplied invite share links.
    pub fn invite_origin_allowlist(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_origin.clone()];
        if !self.is_production() {
            origins.push("http://localhost:3000".to_string());
            origins.push("http://localhost:5173".to_string());
            origins.push("http://127.0.0.1:3000".to_string());
        }
        origins
    }
}
