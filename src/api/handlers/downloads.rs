use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::{author_token, device_id};
use crate::entities::{access_logs, files, prelude::*, rooms};
use crate::services::access_log::ClientMeta;
use crate::services::archive::BulkArchiver;
use crate::services::auth::AuthService;
use crate::utils::validation::is_valid_room_id;
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct DownloadQuery {
    #[serde(rename = "fileKey")]
    pub file_key: String,
}

/// Room id rides inside the blob key as its first path segment.
fn room_of_key(file_key: &str) -> Result<&str, AppError> {
    let room_id = file_key
        .split('/')
        .next()
        .filter(|id| is_valid_room_id(id))
        .ok_or_else(|| AppError::BadRequest("Malformed file key".to_string()))?;
    Ok(room_id)
}

#[utoipa::path(
    get,
    path = "/download",
    params(("fileKey" = String, Query, description = "Blob key")),
    responses(
        (status = 200, description = "Signed download URL"),
        (status = 403, description = "Neither author nor present guest"),
        (status = 409, description = "Burn download already in progress"),
        (status = 410, description = "Destroyed, expired or already consumed")
    )
)]
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<Value>, AppError> {
    let room_id = room_of_key(&query.file_key)?;

    AuthService::authorize(
        &state.db,
        room_id,
        author_token(&headers).as_deref(),
        device_id(&headers).as_deref(),
    )
    .await?;

    let grant = state.downloads.grant(&query.file_key).await?;

    Ok(Json(json!({
        "signedUrl": grant.signed_url,
        "filename": grant.filename,
        "burnMode": grant.burn_mode,
        "roomStatus": grant.room_status,
    })))
}

#[derive(Deserialize, ToSchema)]
pub struct DownloadLockRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
}

#[utoipa::path(
    post,
    path = "/download/start",
    request_body = DownloadLockRequest,
    responses(
        (status = 200, description = "Download slot taken"),
        (status = 403, description = "Unauthorized")
    )
)]
pub async fn download_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DownloadLockRequest>,
) -> Result<Json<Value>, AppError> {
    AuthService::authorize(
        &state.db,
        &req.room_id,
        author_token(&headers).as_deref(),
        device_id(&headers).as_deref(),
    )
    .await?;

    state.downloads.start(&req.room_id).await?;
    Ok(Json(json!({ "locked": true })))
}

#[derive(Deserialize, ToSchema)]
pub struct DownloadEndRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    pub success: bool,
}

#[utoipa::path(
    post,
    path = "/download/end",
    request_body = DownloadEndRequest,
    responses(
        (status = 200, description = "Slot released; burn armed if applicable"),
        (status = 403, description = "Unauthorized")
    )
)]
pub async fn download_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<DownloadEndRequest>,
) -> Result<Json<Value>, AppError> {
    AuthService::authorize(
        &state.db,
        &req.room_id,
        author_token(&headers).as_deref(),
        device_id(&headers).as_deref(),
    )
    .await?;

    let device = device_id(&headers);
    let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));

    state
        .downloads
        .end(
            &req.room_id,
            &req.file_id,
            device.as_deref(),
            &meta,
            req.success,
        )
        .await?;

    Ok(Json(json!({ "released": true })))
}

#[derive(Deserialize, ToSchema)]
pub struct BulkMarkRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fileIds")]
    pub file_ids: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/download/bulk-mark",
    request_body = BulkMarkRequest,
    responses(
        (status = 200, description = "Files marked consumed"),
        (status = 404, description = "No such room")
    )
)]
pub async fn bulk_mark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BulkMarkRequest>,
) -> Result<Json<Value>, AppError> {
    // Missing room reads as 404, not as an authorization failure.
    if !is_valid_room_id(&req.room_id)
        || Rooms::find_by_id(&req.room_id)
            .one(&state.db)
            .await?
            .is_none()
    {
        return Err(AppError::NotFound("Room not found".to_string()));
    }

    AuthService::authorize(
        &state.db,
        &req.room_id,
        author_token(&headers).as_deref(),
        device_id(&headers).as_deref(),
    )
    .await?;

    let marked = state.downloads.bulk_mark(&req.room_id, &req.file_ids).await?;
    Ok(Json(json!({ "filesMarked": marked })))
}

#[derive(Deserialize, ToSchema)]
pub struct PreviewQuery {
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(default)]
    pub proxy: bool,
}

#[utoipa::path(
    get,
    path = "/preview",
    params(
        ("fileKey" = String, Query, description = "Blob key"),
        ("proxy" = bool, Query, description = "Stream bytes instead of a URL")
    ),
    responses(
        (status = 200, description = "Signed URL or byte stream"),
        (status = 410, description = "Expired or destroyed")
    )
)]
pub async fn preview(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, AppError> {
    let room_id = room_of_key(&query.file_key)?;

    let file = Files::find()
        .filter(files::Column::FileKey.eq(&query.file_key))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    if file.is_destroyed() {
        return Err(AppError::Gone("File has been destroyed".to_string()));
    }

    let room = Rooms::find_by_id(room_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;
    if room.status == rooms::STATUS_DESTROYED || room.is_expired(Utc::now()) {
        return Err(AppError::Gone("Room has expired".to_string()));
    }

    if query.proxy {
        let data = state.storage.get_object(&file.file_key).await.map_err(|e| {
            tracing::error!("Preview proxy read of {} failed: {}", file.file_key, e);
            AppError::Internal("Failed to read file".to_string())
        })?;
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_DISPOSITION, "inline")
            .body(Body::from(data))
            .map_err(|e| AppError::Internal(e.to_string()));
    }

    let signed_url = state
        .storage
        .presign_get(&file.file_key, state.config.download_url_ttl, "inline")
        .await
        .map_err(|e| {
            tracing::error!("Failed to presign preview of {}: {}", file.file_key, e);
            AppError::Internal("Failed to generate preview URL".to_string())
        })?;

    Ok(Json(json!({ "signedUrl": signed_url })).into_response())
}

#[derive(Deserialize, ToSchema)]
pub struct BulkDownloadQuery {
    #[serde(rename = "roomId")]
    pub room_id: String,
}

#[utoipa::path(
    get,
    path = "/bulk-download",
    params(("roomId" = String, Query, description = "Room ID")),
    responses(
        (status = 200, description = "Zip archive of the room"),
        (status = 404, description = "Room empty or missing")
    )
)]
pub async fn bulk_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<BulkDownloadQuery>,
) -> Result<Response, AppError> {
    if !is_valid_room_id(&query.room_id) {
        return Err(AppError::BadRequest("Malformed room id".to_string()));
    }

    let room = Rooms::find_by_id(&query.room_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    if room.status == rooms::STATUS_DESTROYED || room.is_expired(Utc::now()) {
        return Err(AppError::Gone("Room has expired".to_string()));
    }

    let files = state.uploads.list_room_files(&room.id).await?;
    if files.is_empty() {
        return Err(AppError::NotFound(
            "No downloadable files in this room".to_string(),
        ));
    }

    let archive = BulkArchiver::build(&state.storage, &room, &files).await?;
    let archive_name = BulkArchiver::archive_name(&room);

    let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));
    state.access_log.log(
        &room.id,
        access_logs::EVENT_BULK_DOWNLOAD,
        &meta,
        device_id(&headers).as_deref(),
        None,
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", archive_name),
        )
        .body(Body::from(archive))
        .map_err(|e| AppError::Internal(e.to_string()))
}
