use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::author_token;
use crate::entities::access_logs;
use crate::services::access_log::ClientMeta;
use crate::services::auth::AuthService;
use crate::services::upload::PartEtag;
use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use utoipa::ToSchema;

/// All upload phases are author-gated.
async fn require_author(
    state: &AppState,
    headers: &HeaderMap,
    room_id: &str,
) -> Result<(), AppError> {
    let token = author_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing author token".to_string()))?;
    if !AuthService::is_author_token(&state.db, room_id, &token).await? {
        return Err(AppError::Unauthorized("Invalid author token".to_string()));
    }
    Ok(())
}

#[derive(Deserialize, ToSchema)]
pub struct InitiateUploadRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/multipart-upload/initiate",
    request_body = InitiateUploadRequest,
    responses(
        (status = 200, description = "Upload handle reserved"),
        (status = 410, description = "Room expired"),
        (status = 413, description = "Quota exceeded")
    )
)]
pub async fn initiate_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<Json<Value>, AppError> {
    require_author(&state, &headers, &req.room_id).await?;

    let result = state
        .uploads
        .initiate(
            &req.room_id,
            &req.file_name,
            req.file_size,
            req.content_type.as_deref(),
        )
        .await?;

    Ok(Json(json!({
        "uploadId": result.upload_id,
        "fileKey": result.file_key,
        "fileId": result.file_id,
    })))
}

#[derive(Deserialize, ToSchema)]
pub struct PartUrlsRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "partNumbers")]
    pub part_numbers: Vec<i32>,
}

#[utoipa::path(
    post,
    path = "/multipart-upload/get-part-urls",
    request_body = PartUrlsRequest,
    responses(
        (status = 200, description = "Presigned part URLs"),
        (status = 400, description = "Empty or oversized part list")
    )
)]
pub async fn get_part_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PartUrlsRequest>,
) -> Result<Json<Value>, AppError> {
    require_author(&state, &headers, &req.room_id).await?;

    let urls = state
        .uploads
        .sign_part_urls(&req.room_id, &req.upload_id, &req.file_key, &req.part_numbers)
        .await?;

    Ok(Json(json!({ "presignedUrls": urls })))
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteUploadRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "burnAfterDownload")]
    pub burn_after_download: Option<bool>,
    pub parts: Vec<PartEtag>,
}

#[utoipa::path(
    post,
    path = "/multipart-upload/complete",
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "File persisted"),
        (status = 413, description = "Quota exceeded at completion")
    )
)]
pub async fn complete_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<Value>, AppError> {
    require_author(&state, &headers, &req.room_id).await?;

    let file = state
        .uploads
        .complete(
            &req.room_id,
            &req.upload_id,
            &req.file_key,
            &req.file_name,
            req.file_size,
            req.content_type,
            req.message,
            req.burn_after_download.unwrap_or(false),
            req.parts,
        )
        .await?;

    let meta = ClientMeta::from_request(&headers, peer.map(|p| p.0.ip()));
    state
        .access_log
        .log(&req.room_id, access_logs::EVENT_FILE_UPLOAD, &meta, None, None);

    Ok(Json(json!({ "file": file })))
}

#[derive(Deserialize, ToSchema)]
pub struct AbortUploadRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
}

#[utoipa::path(
    post,
    path = "/multipart-upload/abort",
    request_body = AbortUploadRequest,
    responses((status = 200, description = "Aborted (idempotent)"))
)]
pub async fn abort_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AbortUploadRequest>,
) -> Result<Json<Value>, AppError> {
    require_author(&state, &headers, &req.room_id).await?;
    state.uploads.abort(&req.upload_id, &req.file_key).await?;
    Ok(Json(json!({ "aborted": true })))
}

#[derive(Deserialize, ToSchema)]
pub struct PresignedUploadRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
}

#[utoipa::path(
    post,
    path = "/presigned-upload",
    request_body = PresignedUploadRequest,
    responses(
        (status = 200, description = "Single-PUT URL"),
        (status = 413, description = "Quota exceeded")
    )
)]
pub async fn presigned_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PresignedUploadRequest>,
) -> Result<Json<Value>, AppError> {
    require_author(&state, &headers, &req.room_id).await?;

    let (upload_url, file_id, file_key) = state
        .uploads
        .presign_single_put(&req.room_id, &req.file_name, req.file_size)
        .await?;

    Ok(Json(json!({
        "uploadUrl": upload_url,
        "fileId": file_id,
        "fileKey": file_key,
    })))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateFileRequest {
    #[serde(rename = "targetUrl")]
    pub target_url: Option<String>,
    pub description: Option<String>,
}

#[utoipa::path(
    patch,
    path = "/update-file/{file_id}",
    params(("file_id" = String, Path, description = "File ID")),
    request_body = UpdateFileRequest,
    responses(
        (status = 200, description = "File updated"),
        (status = 400, description = "Bad URL scheme")
    )
)]
pub async fn update_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
    Json(req): Json<UpdateFileRequest>,
) -> Result<Json<Value>, AppError> {
    let file = state.uploads.find_file(&file_id).await?;
    require_author(&state, &headers, &file.room_id).await?;

    let updated = state
        .uploads
        .update_file(&file_id, req.target_url, req.description)
        .await?;

    Ok(Json(json!({ "file": updated })))
}

#[utoipa::path(
    delete,
    path = "/delete-file/{file_id}",
    params(("file_id" = String, Path, description = "File ID")),
    responses(
        (status = 200, description = "File deleted"),
        (status = 403, description = "Not the room author")
    )
)]
pub async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let file = state.uploads.find_file(&file_id).await?;
    require_author(&state, &headers, &file.room_id).await?;

    state.uploads.delete_file(&file_id).await?;

    Ok(Json(json!({ "deleted": true, "fileId": file_id })))
}
