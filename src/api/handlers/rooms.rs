use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::author_token;
use crate::entities::{prelude::*, *};
use crate::services::auth::AuthService;
use crate::services::capacity::CapacityGate;
use crate::utils::validation::{is_valid_password_hash, is_valid_room_id};
use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(rename = "authorName")]
    pub author_name: Option<String>,
    /// "normal" (default) or "burn"
    pub mode: Option<String>,
    /// sha256 hex of the room password, computed client-side
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    pub capacity: Option<i32>,
    #[serde(rename = "expiresInHours")]
    pub expires_in_hours: Option<i64>,
    #[serde(rename = "isPermanent")]
    pub is_permanent: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct CreateRoomResponse {
    pub id: String,
    /// Returned exactly once. Lose it and the room is orphaned.
    pub author_token: String,
}

#[utoipa::path(
    post,
    path = "/rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Invalid name, mode or password hash")
    )
)]
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 200 {
        return Err(AppError::BadRequest(
            "Room name must be 1-200 characters".to_string(),
        ));
    }

    if !is_valid_password_hash(&req.password_hash) {
        return Err(AppError::BadRequest(
            "Password hash must be 64 lower-hex characters".to_string(),
        ));
    }

    let mode = req.mode.as_deref().unwrap_or(rooms::MODE_NORMAL);
    if mode != rooms::MODE_NORMAL && mode != rooms::MODE_BURN {
        return Err(AppError::BadRequest("Unknown room mode".to_string()));
    }

    let capacity = req.capacity.unwrap_or(state.config.default_capacity);
    if capacity < 1 {
        return Err(AppError::BadRequest("Capacity must be positive".to_string()));
    }

    let now = Utc::now();
    let ttl = match req.expires_in_hours {
        Some(hours) if hours > 0 => chrono::Duration::hours(hours),
        Some(_) => return Err(AppError::BadRequest("Expiry must be positive".to_string())),
        None => chrono::Duration::from_std(state.config.default_room_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24)),
    };

    let room_id = Uuid::new_v4().to_string();
    let author_token = AuthService::generate_author_token();

    let room = rooms::ActiveModel {
        id: Set(room_id.clone()),
        name: Set(name.to_string()),
        author_name: Set(req.author_name.unwrap_or_else(|| "Author".to_string())),
        mode: Set(mode.to_string()),
        status: Set(rooms::STATUS_ACTIVE.to_string()),
        expires_at: Set(now + ttl),
        is_permanent: Set(req.is_permanent.unwrap_or(false)),
        capacity: Set(capacity),
        remaining_files: Set(0),
        active_downloads: Set(0),
        last_download_activity: Set(None),
        termination_started_at: Set(None),
        file_count: Set(0),
        total_size_bytes: Set(0),
        max_files: Set(state.config.room_max_files),
        max_total_size_bytes: Set(state.config.room_max_total_size_bytes),
        created_at: Set(now),
    };
    room.insert(&state.db).await?;

    let secret = room_secrets::ActiveModel {
        room_id: Set(room_id.clone()),
        password_hash: Set(req.password_hash),
        author_token: Set(author_token.clone()),
        created_at: Set(now),
    };
    secret.insert(&state.db).await?;

    tracing::info!("🚪 Room created: {} (mode={})", room_id, mode);

    Ok(Json(CreateRoomResponse {
        id: room_id,
        author_token,
    }))
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyPasswordRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
}

#[utoipa::path(
    post,
    path = "/rooms/verify-password",
    request_body = VerifyPasswordRequest,
    responses(
        (status = 200, description = "Verification result"),
        (status = 400, description = "Malformed id or hash")
    )
)]
pub async fn verify_password(
    State(state): State<AppState>,
    Json(req): Json<VerifyPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    if !is_valid_room_id(&req.room_id) {
        return Err(AppError::BadRequest("Malformed room id".to_string()));
    }
    if !is_valid_password_hash(&req.password_hash) {
        return Err(AppError::BadRequest("Malformed password hash".to_string()));
    }

    let valid = AuthService::verify_password_hash(&state.db, &req.room_id, &req.password_hash)
        .await?;
    Ok(Json(json!({ "valid": valid })))
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyAuthorRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "authorToken")]
    pub author_token: String,
}

#[utoipa::path(
    post,
    path = "/verify-author",
    request_body = VerifyAuthorRequest,
    responses((status = 200, description = "Verification result"))
)]
pub async fn verify_author(
    State(state): State<AppState>,
    Json(req): Json<VerifyAuthorRequest>,
) -> Result<Json<Value>, AppError> {
    let valid = AuthService::is_author_token(&state.db, &req.room_id, &req.author_token).await?;
    Ok(Json(json!({ "valid": valid })))
}

#[utoipa::path(
    delete,
    path = "/delete-room/{room_id}",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 200, description = "Room deleted"),
        (status = 403, description = "Not the room author")
    )
)]
pub async fn delete_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let token = author_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("Missing author token".to_string()))?;
    if !AuthService::is_author_token(&state.db, &room_id, &token).await? {
        return Err(AppError::Unauthorized("Invalid author token".to_string()));
    }

    let files_deleted = state.lifecycle.destroy_room(&room_id).await?;
    Ok(Json(json!({ "filesDeleted": files_deleted })))
}

#[utoipa::path(
    get,
    path = "/room-capacity/{room_id}",
    params(("room_id" = String, Path, description = "Room ID")),
    responses(
        (status = 200, description = "Occupancy gauge"),
        (status = 404, description = "No such room")
    )
)]
pub async fn room_capacity(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !is_valid_room_id(&room_id) {
        return Err(AppError::BadRequest("Malformed room id".to_string()));
    }

    let room = Rooms::find_by_id(&room_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    let (current, max) =
        CapacityGate::occupancy(&state.db, &room, state.config.active_window).await?;

    let is_unlimited = room.is_unlimited();
    let is_full = !is_unlimited && current >= max as u64;
    let is_near_full = !is_unlimited && current * 10 >= (max as u64) * 8;

    Ok(Json(json!({
        "current": current,
        "max": max,
        "isFull": is_full,
        "isNearFull": is_near_full,
        "isUnlimited": is_unlimited,
    })))
}
