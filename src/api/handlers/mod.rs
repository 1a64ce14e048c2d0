pub mod analytics;
pub mod downloads;
pub mod health;
pub mod invites;
pub mod room_access;
pub mod rooms;
pub mod uploads;

use axum::http::HeaderMap;

/// `X-Author-Token` header, if present and non-empty.
pub fn author_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-author-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `X-Device-Id` header, if present and non-empty.
pub fn device_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-device-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
