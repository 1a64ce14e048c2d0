use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::author_token;
use crate::entities::{access_logs, prelude::*, room_presence, rooms};
use crate::services::auth::{AuthService, constant_time_eq};
use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde_json::{Value, json};

/// The analytics surface answers 404 (not 401) to anything without a valid
/// bearer, so its existence cannot be probed.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Not found".to_string()))?;

    let supplied = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !constant_time_eq(supplied, expected) {
        return Err(AppError::NotFound("Not found".to_string()));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/access-logs/{room_id}",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 200, description = "Raw access logs"),
        (status = 403, description = "Not the room author")
    )
)]
pub async fn access_logs_for_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let token = author_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("Missing author token".to_string()))?;
    if !AuthService::is_author_token(&state.db, &room_id, &token).await? {
        return Err(AppError::Unauthorized("Invalid author token".to_string()));
    }

    let logs = AccessLogs::find()
        .filter(access_logs::Column::RoomId.eq(&room_id))
        .order_by_desc(access_logs::Column::CreatedAt)
        .limit(500)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "logs": logs })))
}

#[utoipa::path(
    get,
    path = "/analytics/live",
    responses(
        (status = 200, description = "Live gauges"),
        (status = 404, description = "Missing or invalid bearer (deliberate)")
    )
)]
pub async fn analytics_live(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let active_rooms = Rooms::find()
        .filter(rooms::Column::Status.eq(rooms::STATUS_ACTIVE))
        .count(&state.db)
        .await?;

    let window_cutoff = Utc::now()
        - chrono::Duration::from_std(state.config.active_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
    let active_guests = RoomPresence::find()
        .filter(room_presence::Column::Status.eq(room_presence::STATUS_ACTIVE))
        .filter(room_presence::Column::LastSeenAt.gte(window_cutoff))
        .count(&state.db)
        .await?;

    let downloads_last_hour = AccessLogs::find()
        .filter(access_logs::Column::EventType.eq(access_logs::EVENT_FILE_DOWNLOAD))
        .filter(access_logs::Column::CreatedAt.gte(Utc::now() - chrono::Duration::hours(1)))
        .count(&state.db)
        .await?;

    Ok(Json(json!({
        "activeRooms": active_rooms,
        "activeGuests": active_guests,
        "downloadsLastHour": downloads_last_hour,
    })))
}

#[utoipa::path(
    get,
    path = "/analytics-admin/overview",
    responses(
        (status = 200, description = "Aggregate totals"),
        (status = 404, description = "Missing or invalid bearer (deliberate)")
    )
)]
pub async fn analytics_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let total_rooms = Rooms::find().count(&state.db).await?;
    let total_files = Files::find().count(&state.db).await?;

    let mut events = serde_json::Map::new();
    for event_type in [
        access_logs::EVENT_ROOM_ACCESS,
        access_logs::EVENT_LEAVE,
        access_logs::EVENT_FILE_UPLOAD,
        access_logs::EVENT_FILE_DOWNLOAD,
        access_logs::EVENT_BULK_DOWNLOAD,
        access_logs::EVENT_INVITE_SENT,
    ] {
        let count = AccessLogs::find()
            .filter(access_logs::Column::EventType.eq(event_type))
            .count(&state.db)
            .await?;
        events.insert(event_type.to_string(), json!(count));
    }

    Ok(Json(json!({
        "totalRooms": total_rooms,
        "totalFiles": total_files,
        "events": events,
    })))
}
