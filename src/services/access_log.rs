use crate::api::error::AppError;
use crate::entities::{access_logs, prelude::*};
use crate::services::geo::GeoProvider;
use crate::utils::ua::parse_user_agent;
use axum::http::HeaderMap;
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Request-side facts the access log cares about.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn from_request(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        Self {
            ip: resolve_client_ip(headers, peer),
            user_agent: headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        }
    }
}

/// Trust-proxy IP resolution: first X-Forwarded-For element, else X-Real-IP,
/// else the socket peer. IPv6-mapped IPv4 is normalized.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(normalize_ip(first));
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let value = value.trim();
            if !value.is_empty() {
                return Some(normalize_ip(value));
            }
        }
    }

    peer.map(|ip| normalize_ip(&ip.to_string()))
}

fn normalize_ip(ip: &str) -> String {
    ip.strip_prefix("::ffff:").unwrap_or(ip).to_string()
}

/// Append-only event stream with geo + UA enrichment and a best-effort
/// in-process dedup window. A restart or second process may admit a
/// duplicate; the download path therefore also dedups `file_download` at
/// the database level.
pub struct AccessLogService {
    db: DatabaseConnection,
    geo: Arc<dyn GeoProvider>,
    dedup: DashMap<(String, String, String), Instant>,
    dedup_ttl: Duration,
}

impl AccessLogService {
    pub fn new(db: DatabaseConnection, geo: Arc<dyn GeoProvider>, dedup_ttl: Duration) -> Self {
        Self {
            db,
            geo,
            dedup: DashMap::new(),
            dedup_ttl,
        }
    }

    /// Fire-and-forget event write. Enrichment and insert run off the
    /// request path; failures are logged and swallowed.
    pub fn log(
        self: &Arc<Self>,
        room_id: &str,
        event_type: &str,
        meta: &ClientMeta,
        device_id: Option<&str>,
        session_id: Option<&str>,
    ) {
        let key = (
            room_id.to_string(),
            event_type.to_string(),
            device_id.unwrap_or_default().to_string(),
        );

        let now = Instant::now();
        if let Some(seen) = self.dedup.get(&key) {
            if now.duration_since(*seen) < self.dedup_ttl {
                return;
            }
        }
        self.dedup.insert(key, now);

        if self.dedup.len() > 4096 {
            let ttl = self.dedup_ttl;
            self.dedup.retain(|_, t| now.duration_since(*t) < ttl);
        }

        let svc = Arc::clone(self);
        let room_id = room_id.to_string();
        let event_type = event_type.to_string();
        let meta = meta.clone();
        let device_id = device_id.map(|s| s.to_string());
        let session_id = session_id.map(|s| s.to_string());

        tokio::spawn(async move {
            if let Err(e) = svc
                .insert(&room_id, &event_type, &meta, device_id, session_id)
                .await
            {
                tracing::error!("Failed to persist access log: {}", e);
            }
        });
    }

    async fn insert(
        &self,
        room_id: &str,
        event_type: &str,
        meta: &ClientMeta,
        device_id: Option<String>,
        session_id: Option<String>,
    ) -> anyhow::Result<()> {
        let geo = match &meta.ip {
            Some(ip) => self.geo.lookup(ip).await.unwrap_or_default(),
            None => Default::default(),
        };

        let parsed = meta.user_agent.as_deref().map(parse_user_agent);

        let row = access_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            room_id: Set(room_id.to_string()),
            event_type: Set(event_type.to_string()),
            device_id: Set(device_id),
            session_id: Set(session_id),
            ip_address: Set(meta.ip.clone()),
            user_agent: Set(meta.user_agent.clone()),
            browser: Set(parsed.as_ref().map(|p| p.browser.clone())),
            os: Set(parsed.as_ref().map(|p| p.os.clone())),
            device_type: Set(parsed.as_ref().map(|p| p.device_type.clone())),
            country: Set(geo.country),
            city: Set(geo.city),
            region: Set(geo.region),
            postal: Set(geo.postal),
            timezone: Set(geo.timezone),
            created_at: Set(Utc::now()),
        };

        row.insert(&self.db).await?;
        Ok(())
    }

    /// Database-level dedup check for events that must be once-per-device.
    pub async fn has_event(
        db: &DatabaseConnection,
        room_id: &str,
        device_id: &str,
        event_type: &str,
    ) -> Result<bool, AppError> {
        use sea_orm::PaginatorTrait;
        let count = AccessLogs::find()
            .filter(access_logs::Column::RoomId.eq(room_id))
            .filter(access_logs::Column::DeviceId.eq(device_id))
            .filter(access_logs::Column::EventType.eq(event_type))
            .count(db)
            .await?;
        Ok(count > 0)
    }

    /// Synchronous insert used where the write must be observable before the
    /// response (the download path's once-per-device log).
    pub async fn log_now(
        &self,
        room_id: &str,
        event_type: &str,
        meta: &ClientMeta,
        device_id: Option<&str>,
    ) -> Result<(), AppError> {
        self.insert(
            room_id,
            event_type,
            meta,
            device_id.map(|s| s.to_string()),
            None,
        )
        .await
        .map_err(|e| {
            tracing::error!("Access log write failed: {}", e);
            AppError::Internal("Access log write failed".to_string())
        })
    }
}
