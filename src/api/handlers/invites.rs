use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::device_id;
use crate::entities::{access_logs, prelude::*};
use crate::services::access_log::{ClientMeta, resolve_client_ip};
use crate::services::invite::{default_share_url, render_invite_email, validate_share_link};
use crate::utils::validation::{is_valid_email, is_valid_room_id};
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
};
use sea_orm::EntityTrait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use utoipa::ToSchema;

const RECIPIENT_LIMIT: (u32, Duration) = (3, Duration::from_secs(3600));
const IP_ROOM_LIMIT: (u32, Duration) = (3, Duration::from_secs(30 * 60));
const MIN_INTERVAL: Duration = Duration::from_secs(8);

#[derive(Deserialize, ToSchema)]
pub struct InviteRequest {
    pub email: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "shareLink")]
    pub share_link: Option<String>,
}

#[utoipa::path(
    post,
    path = "/invite",
    request_body = InviteRequest,
    responses(
        (status = 200, description = "Invite sent"),
        (status = 400, description = "Bad email, room id or share link"),
        (status = 429, description = "An invite bin is exhausted")
    )
)]
pub async fn send_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<Value>, AppError> {
    // Gates run in a fixed order; rate budget is consumed before the
    // external send so timeouts cannot be used to probe for free retries.
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }
    if !is_valid_room_id(&req.room_id) {
        return Err(AppError::BadRequest("Malformed room id".to_string()));
    }

    let ip = resolve_client_ip(&headers, peer.as_ref().map(|p| p.0.ip()))
        .unwrap_or_else(|| "unknown".to_string());

    state
        .rate_limiter
        .check_min_interval(&format!("invite-interval:{}", ip), MIN_INTERVAL)
        .map_err(AppError::RateLimited)?;

    let (rcpt_max, rcpt_window) = RECIPIENT_LIMIT;
    state
        .rate_limiter
        .check(&format!("invite-rcpt:{}", email), rcpt_max, rcpt_window)
        .map_err(AppError::RateLimited)?;

    let (pair_max, pair_window) = IP_ROOM_LIMIT;
    state
        .rate_limiter
        .check(
            &format!("invite-pair:{}:{}", ip, req.room_id),
            pair_max,
            pair_window,
        )
        .map_err(AppError::RateLimited)?;

    let room = Rooms::find_by_id(&req.room_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    let url = match req.share_link.as_deref().filter(|l| !l.is_empty()) {
        Some(link) => validate_share_link(
            link,
            &req.room_id,
            &state.config.invite_origin_allowlist(),
        )?,
        None => default_share_url(&state.config.frontend_origin, &req.room_id),
    };

    let (subject, html) = render_invite_email(&room.name, &room.author_name, &url);

    state.mailer.send(&email, &subject, &html).await.map_err(|e| {
        tracing::error!("Invite send to {} failed: {}", email, e);
        AppError::Internal("Failed to send invite".to_string())
    })?;

    let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));
    state.access_log.log(
        &room.id,
        access_logs::EVENT_INVITE_SENT,
        &meta,
        device_id(&headers).as_deref(),
        None,
    );

    tracing::info!("📨 Invite sent for room {}", room.id);
    Ok(Json(json!({ "sent": true })))
}
