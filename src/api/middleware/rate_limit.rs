use crate::AppState;
use crate::api::error::AppError;
use crate::services::access_log::resolve_client_ip;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Per-route fixed-window caps. The global bin applies before any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Upload,
    Presign,
    Download,
    RoomAccess,
    Heartbeat,
    Activity,
    Delete,
    Invite,
    Admin,
}

impl RouteClass {
    pub fn limit(&self) -> (u32, Duration) {
        match self {
            RouteClass::Upload => (30, Duration::from_secs(15 * 60)),
            RouteClass::Presign => (12, Duration::from_secs(60)),
            RouteClass::Download => (80, Duration::from_secs(15 * 60)),
            RouteClass::RoomAccess => (4, Duration::from_secs(60)),
            RouteClass::Heartbeat => (12, Duration::from_secs(60)),
            RouteClass::Activity => (60, Duration::from_secs(60)),
            RouteClass::Delete => (8, Duration::from_secs(60)),
            RouteClass::Invite => (6, Duration::from_secs(10 * 60)),
            RouteClass::Admin => (20, Duration::from_secs(60)),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            RouteClass::Upload => "upload",
            RouteClass::Presign => "presign",
            RouteClass::Download => "download",
            RouteClass::RoomAccess => "access",
            RouteClass::Heartbeat => "heartbeat",
            RouteClass::Activity => "activity",
            RouteClass::Delete => "delete",
            RouteClass::Invite => "invite",
            RouteClass::Admin => "admin",
        }
    }

    /// Classes shed by the overload guard. Presence and health stay up no
    /// matter what.
    pub fn is_heavy(&self) -> bool {
        matches!(
            self,
            RouteClass::Upload
                | RouteClass::Presign
                | RouteClass::Invite
                | RouteClass::Admin
                | RouteClass::Activity
        )
    }
}

pub const GLOBAL_LIMIT: (u32, Duration) = (300, Duration::from_secs(15 * 60));

/// Map a request path (under /api) to its limit class. Order matters:
/// more specific prefixes first.
pub fn classify(path: &str) -> Option<RouteClass> {
    let path = path.strip_prefix("/api").unwrap_or(path);

    if path == "/health" {
        return None;
    }
    if path.starts_with("/multipart-upload/get-part-urls") || path.starts_with("/presigned-upload")
    {
        return Some(RouteClass::Presign);
    }
    if path.starts_with("/multipart-upload") || path.starts_with("/update-file") {
        return Some(RouteClass::Upload);
    }
    if path.starts_with("/rooms/verify-password") || path.starts_with("/verify-author") {
        return Some(RouteClass::RoomAccess);
    }
    if path.starts_with("/rooms") {
        return Some(RouteClass::Upload);
    }
    if path.starts_with("/room-access/presence") || path.starts_with("/room-access/leave") {
        return Some(RouteClass::Heartbeat);
    }
    if path.starts_with("/room-access/activity") {
        return Some(RouteClass::Activity);
    }
    if path.starts_with("/room-access") {
        return Some(RouteClass::RoomAccess);
    }
    if path.starts_with("/download") || path.starts_with("/bulk-download") || path.starts_with("/preview") {
        return Some(RouteClass::Download);
    }
    if path.starts_with("/delete-file") || path.starts_with("/delete-room") {
        return Some(RouteClass::Delete);
    }
    if path.starts_with("/invite") {
        return Some(RouteClass::Invite);
    }
    if path.starts_with("/analytics") {
        return Some(RouteClass::Admin);
    }
    if path.starts_with("/room-capacity") {
        return Some(RouteClass::Activity);
    }
    None
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counters keyed by arbitrary strings, shared across route
/// classes and the invite compound bins. Process-local: a multi-node
/// deployment tolerates over-admission by one node count (see design notes).
#[derive(Clone, Default)]
pub struct FixedWindowLimiter {
    windows: std::sync::Arc<DashMap<String, Window>>,
    last_seen: std::sync::Arc<DashMap<String, Instant>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one request from `key`'s window. Err carries the seconds
    /// until the window resets, for Retry-After.
    pub fn check(&self, key: &str, max: u32, window: Duration) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                started: now,
                count: 0,
            });

        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= max {
            let elapsed = now.duration_since(entry.started);
            let retry = window.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry);
        }

        entry.count += 1;
        Ok(())
    }

    /// Minimum spacing between consecutive requests on `key` (invite uses
    /// 8 s). Consumes the slot on success.
    pub fn check_min_interval(&self, key: &str, min_interval: Duration) -> Result<(), u64> {
        let now = Instant::now();
        if let Some(last) = self.last_seen.get(key) {
            let since = now.duration_since(*last);
            if since < min_interval {
                return Err(min_interval.saturating_sub(since).as_secs().max(1));
            }
        }
        self.last_seen.insert(key.to_string(), now);
        Ok(())
    }

    /// Drop windows idle longer than `max_idle`. Called opportunistically.
    pub fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < max_idle);
        self.last_seen
            .retain(|_, t| now.duration_since(*t) < max_idle);
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();
    let Some(class) = classify(&path) else {
        return Ok(next.run(req).await);
    };

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let ip = resolve_client_ip(req.headers(), peer).unwrap_or_else(|| "unknown".to_string());

    let (global_max, global_window) = GLOBAL_LIMIT;
    state
        .rate_limiter
        .check(&format!("global:{}", ip), global_max, global_window)
        .map_err(AppError::RateLimited)?;

    let (max, window) = class.limit();
    state
        .rate_limiter
        .check(&format!("{}:{}", class.key(), ip), max, window)
        .map_err(|retry| {
            tracing::warn!(ip = %ip, class = class.key(), "Rate limit exceeded");
            AppError::RateLimited(retry)
        })?;

    Ok(next.run(req).await)
}
