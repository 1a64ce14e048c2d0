use crate::api::error::AppError;
use crate::utils::validation::is_valid_key_fragment;

/// Server-side reconstruction of the outgoing invite URL. A client-supplied
/// share link is accepted only when its origin, path and fragment all pass;
/// everything else is rebuilt from configuration so a hostile client cannot
/// smuggle an attacker origin or tracking params into the email.
pub fn validate_share_link(
    link: &str,
    room_id: &str,
    origin_allowlist: &[String],
) -> Result<String, AppError> {
    let parsed = url::Url::parse(link)
        .map_err(|_| AppError::BadRequest("Malformed share link".to_string()))?;

    let origin = parsed.origin().ascii_serialization();
    if !origin_allowlist.iter().any(|allowed| allowed == &origin) {
        return Err(AppError::BadRequest(
            "Share link origin is not allowed".to_string(),
        ));
    }

    if parsed.path() != format!("/room/{}", room_id) {
        return Err(AppError::BadRequest("Share link path mismatch".to_string()));
    }

    if parsed.query().is_some() {
        return Err(AppError::BadRequest(
            "Share link must not carry query parameters".to_string(),
        ));
    }

    let fragment = match parsed.fragment() {
        None | Some("") => None,
        Some(fragment) => {
            let Some(key) = fragment.strip_prefix("key=") else {
                return Err(AppError::BadRequest(
                    "Share link fragment must be a single key parameter".to_string(),
                ));
            };
            if key.contains('&') || !is_valid_key_fragment(key) {
                return Err(AppError::BadRequest(
                    "Share link key fragment is malformed".to_string(),
                ));
            }
            Some(key.to_string())
        }
    };

    let canonical = match fragment {
        Some(key) => format!("{}/room/{}#key={}", origin, room_id, key),
        None => format!("{}/room/{}", origin, room_id),
    };
    Ok(canonical)
}

/// Fallback URL when the client supplied no share link.
pub fn default_share_url(frontend_origin: &str, room_id: &str) -> String {
    format!("{}/room/{}", frontend_origin.trim_end_matches('/'), room_id)
}

/// Inline HTML template. The heavy styling lives in the frontend; the email
/// only needs to survive mail clients.
pub fn render_invite_email(room_name: &str, author_name: &str, url: &str) -> (String, String) {
    let subject = format!("{} invited you to a SafeShare room", author_name);
    let html = format!(
        r#"<div style="font-family:sans-serif;max-width:480px;margin:0 auto">
  <h2>You've been invited to "{room}"</h2>
  <p>{author} shared files with you in a private room. The room and its
  files are temporary and may be gone after a single download.</p>
  <p style="margin:24px 0">
    <a href="{url}" style="background:#1a73e8;color:#fff;padding:12px 24px;border-radius:6px;text-decoration:none">Open room</a>
  </p>
  <p style="color:#666;font-size:12px">If the button does not work, copy
  this link: {url}</p>
</div>"#,
        room = html_escape(room_name),
        author = html_escape(author_name),
        url = url,
    );
    (subject, html)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
