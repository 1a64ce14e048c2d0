use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::{author_token, device_id};
use crate::entities::{prelude::*, *};
use crate::services::access_log::ClientMeta;
use crate::services::auth::AuthService;
use crate::services::capacity::{AdmitDecision, CapacityGate};
use crate::services::presence::PresenceService;
use crate::utils::validation::is_valid_room_id;
use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct RoomAccessRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
}

async fn load_joinable_room(
    state: &AppState,
    room_id: &str,
) -> Result<rooms::Model, AppError> {
    if !is_valid_room_id(room_id) {
        return Err(AppError::BadRequest("Malformed room id".to_string()));
    }
    let room = Rooms::find_by_id(room_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    if room.status == rooms::STATUS_DESTROYED {
        return Err(AppError::NotFound("Room not found".to_string()));
    }
    if room.is_expired(Utc::now()) {
        return Err(AppError::Gone("Room has expired".to_string()));
    }
    Ok(room)
}

#[utoipa::path(
    post,
    path = "/room-access",
    request_body = RoomAccessRequest,
    responses(
        (status = 200, description = "Joined; guest number assigned"),
        (status = 403, description = "Room at capacity"),
        (status = 404, description = "No such room")
    )
)]
pub async fn join_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<RoomAccessRequest>,
) -> Result<Response, AppError> {
    let room = load_joinable_room(&state, &req.room_id).await?;

    // Authors are identified by token alone; they hold no seat.
    if let Some(token) = author_token(&headers) {
        if AuthService::is_author_token(&state.db, &room.id, &token).await? {
            return Ok(Json(json!({ "skipped": "author" })).into_response());
        }
    }

    let device = device_id(&headers)
        .ok_or_else(|| AppError::BadRequest("Missing X-Device-Id".to_string()))?;

    match CapacityGate::admit(&state.db, &room, &device, state.config.active_window).await? {
        AdmitDecision::Full => Ok(AppError::room_full()),
        AdmitDecision::Admitted => {
            let guest_number =
                PresenceService::assign_guest_number(&state.db, &room.id, &device).await?;

            let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));
            state.access_log.log(
                &room.id,
                access_logs::EVENT_ROOM_ACCESS,
                &meta,
                Some(&device),
                None,
            );

            Ok(Json(json!({ "guestNumber": guest_number })).into_response())
        }
    }
}

#[utoipa::path(
    post,
    path = "/room-access/presence",
    request_body = RoomAccessRequest,
    responses(
        (status = 200, description = "Heartbeat accepted"),
        (status = 403, description = "Room at capacity")
    )
)]
pub async fn presence_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RoomAccessRequest>,
) -> Result<Response, AppError> {
    let room = load_joinable_room(&state, &req.room_id).await?;

    if let Some(token) = author_token(&headers) {
        if AuthService::is_author_token(&state.db, &room.id, &token).await? {
            return Ok(Json(json!({ "skipped": "author" })).into_response());
        }
    }

    let device = device_id(&headers)
        .ok_or_else(|| AppError::BadRequest("Missing X-Device-Id".to_string()))?;

    match CapacityGate::admit(&state.db, &room, &device, state.config.active_window).await? {
        AdmitDecision::Full => Ok(AppError::room_full()),
        AdmitDecision::Admitted => Ok(Json(json!({ "status": "ok" })).into_response()),
    }
}

#[utoipa::path(
    post,
    path = "/room-access/leave",
    request_body = RoomAccessRequest,
    responses((status = 204, description = "Marked left"))
)]
pub async fn leave_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<RoomAccessRequest>,
) -> Result<StatusCode, AppError> {
    // Beacon endpoint: best-effort, always 204 so the client never retries.
    if !is_valid_room_id(&req.room_id) {
        return Ok(StatusCode::NO_CONTENT);
    }

    if let Some(device) = device_id(&headers) {
        PresenceService::mark_left(&state.db, &req.room_id, &device).await?;

        let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));
        state.access_log.log(
            &req.room_id,
            access_logs::EVENT_LEAVE,
            &meta,
            Some(&device),
            None,
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/room-access/activity/{room_id}",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 200, description = "Recent room activity"),
        (status = 403, description = "Not the room author")
    )
)]
pub async fn room_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = author_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("Missing author token".to_string()))?;
    if !AuthService::is_author_token(&state.db, &room_id, &token).await? {
        return Err(AppError::Unauthorized("Invalid author token".to_string()));
    }

    let logs = AccessLogs::find()
        .filter(access_logs::Column::RoomId.eq(&room_id))
        .order_by_desc(access_logs::Column::CreatedAt)
        .limit(100)
        .all(&state.db)
        .await?;

    let mut activities = Vec::with_capacity(logs.len());
    for log in logs {
        let guest_number = match &log.device_id {
            Some(device) => PresenceService::guest_number(&state.db, &room_id, device).await?,
            None => None,
        };
        let label = match guest_number {
            Some(n) => format!("Guest {}", n),
            None => "Unknown".to_string(),
        };
        activities.push(json!({
            "event": log.event_type,
            "guestNumber": guest_number,
            "guestLabel": label,
            "browser": log.browser,
            "os": log.os,
            "deviceType": log.device_type,
            "country": log.country,
            "city": log.city,
            "timestamp": log.created_at,
        }));
    }

    Ok(Json(json!({ "activities": activities })))
}
