use crate::api::error::AppError;
use crate::config::AppConfig;
use crate::entities::{prelude::*, *};
use crate::services::lifecycle::RoomLifecycle;
use crate::services::quota::QuotaEngine;
use crate::services::scanner::HeuristicScanner;
use crate::services::storage::StorageService;
use crate::utils::validation::validate_filename;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MAX_PARTS: usize = 10_000;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct InitiateUploadResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct PartEtag {
    #[serde(rename = "partNumber")]
    pub part_number: i32,
    pub etag: String,
}

/// Three-phase multipart upload against the object store, with quota
/// enforcement on both ends. Initiate leaves no database state; the file
/// row exists only after the store has acknowledged completion.
pub struct UploadOrchestrator {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    config: AppConfig,
}

impl UploadOrchestrator {
    pub fn new(db: DatabaseConnection, storage: Arc<dyn StorageService>, config: AppConfig) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }

    /// Room must exist, be active and unexpired for any upload work.
    async fn load_live_room(&self, room_id: &str) -> Result<rooms::Model, AppError> {
        let room = Rooms::find_by_id(room_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

        if room.status != rooms::STATUS_ACTIVE {
            return Err(AppError::Gone("Room is no longer accepting uploads".to_string()));
        }
        if room.is_expired(Utc::now()) {
            return Err(AppError::Gone("Room has expired".to_string()));
        }
        Ok(room)
    }

    fn build_file_key(room_id: &str, file_id: &str, filename: &str) -> String {
        format!("{}/{}_{}", room_id, file_id, filename)
    }

    /// Phase 1: reserve an upload handle. Fails before any store call on a
    /// bad filename, zero size, or a quota breach.
    pub async fn initiate(
        &self,
        room_id: &str,
        filename: &str,
        file_size: i64,
        content_type: Option<&str>,
    ) -> Result<InitiateUploadResponse, AppError> {
        validate_filename(filename).map_err(|e| AppError::BadRequest(e.to_string()))?;
        if file_size <= 0 {
            return Err(AppError::BadRequest("File size must be positive".to_string()));
        }

        let room = self.load_live_room(room_id).await?;
        QuotaEngine::ensure_quota(&room, file_size)?;

        let file_id = Uuid::new_v4().to_string();
        let file_key = Self::build_file_key(room_id, &file_id, filename);

        let upload_id = self
            .storage
            .create_multipart_upload(&file_key, content_type)
            .await
            .map_err(|e| {
                tracing::error!("Failed to initiate multipart upload for {}: {}", file_key, e);
                AppError::Internal("Failed to initiate upload".to_string())
            })?;

        tracing::info!(
            "📤 Multipart upload initiated: room={} file={} size={}",
            room_id,
            file_id,
            file_size
        );

        Ok(InitiateUploadResponse {
            upload_id,
            file_key,
            file_id,
        })
    }

    /// Phase 2: presigned PUT URLs for a set of part numbers. Idempotent;
    /// the client may re-request any subset.
    pub async fn sign_part_urls(
        &self,
        room_id: &str,
        upload_id: &str,
        file_key: &str,
        part_numbers: &[i32],
    ) -> Result<Vec<String>, AppError> {
        if part_numbers.is_empty() {
            return Err(AppError::BadRequest("No part numbers given".to_string()));
        }
        if part_numbers.len() > MAX_PARTS {
            return Err(AppError::BadRequest(format!(
                "At most {} parts per upload",
                MAX_PARTS
            )));
        }
        if part_numbers
            .iter()
            .any(|&n| n < 1 || n as usize > MAX_PARTS)
        {
            return Err(AppError::BadRequest(
                "Part numbers must be in 1..=10000".to_string(),
            ));
        }
        if !file_key.starts_with(&format!("{}/", room_id)) {
            return Err(AppError::BadRequest("File key does not match room".to_string()));
        }

        self.load_live_room(room_id).await?;

        let mut urls = Vec::with_capacity(part_numbers.len());
        for &part_number in part_numbers {
            let url = self
                .storage
                .presign_upload_part(file_key, upload_id, part_number, self.config.upload_url_ttl)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to presign part {} of {}: {}", part_number, file_key, e);
                    AppError::Internal("Failed to presign upload part".to_string())
                })?;
            urls.push(url);
        }

        Ok(urls)
    }

    /// Phase 3: finalize against the store, then persist metadata. A store
    /// failure aborts best-effort and leaves no database state.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        room_id: &str,
        upload_id: &str,
        file_key: &str,
        filename: &str,
        file_size: i64,
        content_type: Option<String>,
        message: Option<String>,
        burn_after_download: bool,
        parts: Vec<PartEtag>,
    ) -> Result<files::Model, AppError> {
        validate_filename(filename).map_err(|e| AppError::BadRequest(e.to_string()))?;
        if file_size <= 0 {
            return Err(AppError::BadRequest("File size must be positive".to_string()));
        }
        if parts.is_empty() {
            return Err(AppError::BadRequest("No parts given".to_string()));
        }
        if !file_key.starts_with(&format!("{}/", room_id)) {
            return Err(AppError::BadRequest("File key does not match room".to_string()));
        }

        // Recheck both liveness and quota: concurrent uploads may have
        // filled the room since initiate.
        let room = self.load_live_room(room_id).await?;
        QuotaEngine::ensure_quota(&room, file_size)?;

        let part_tuples: Vec<(i32, String)> = parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect();

        if let Err(e) = self
            .storage
            .complete_multipart_upload(file_key, upload_id, part_tuples)
            .await
        {
            tracing::error!("Multipart completion failed for {}: {}", file_key, e);
            if let Err(abort_err) = self.storage.abort_multipart_upload(file_key, upload_id).await
            {
                tracing::warn!("Best-effort abort of {} also failed: {}", file_key, abort_err);
            }
            return Err(AppError::Internal("Failed to finalize upload".to_string()));
        }

        let file_id = file_key
            .rsplit('/')
            .next()
            .and_then(|tail| tail.split('_').next())
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let large = file_size >= self.config.scan_size_limit;
        let (scan_status, scan_result) = if large {
            let verdict = HeuristicScanner::large_file_verdict();
            (verdict.status.to_string(), Some(verdict.result))
        } else {
            (
                files::SCAN_UNKNOWN.to_string(),
                Some("Pending scan...".to_string()),
            )
        };

        let row = files::ActiveModel {
            id: Set(file_id.clone()),
            room_id: Set(room_id.to_string()),
            filename: Set(filename.to_string()),
            file_key: Set(file_key.to_string()),
            size_bytes: Set(file_size),
            content_type: Set(content_type),
            download_count: Set(0),
            file_status: Set(files::STATUS_LIVE.to_string()),
            burn_after_download: Set(burn_after_download),
            scan_status: Set(scan_status),
            scan_result: Set(scan_result),
            message: Set(message),
            target_url: Set(None),
            description: Set(None),
            created_at: Set(Utc::now()),
        };

        let persisted = row.insert(&self.db).await?;

        RoomLifecycle::increment_remaining_files(&self.db, room_id).await?;
        QuotaEngine::record_upload(&self.db, room_id, file_size).await?;

        if !large {
            HeuristicScanner::spawn_scan(
                self.db.clone(),
                Arc::clone(&self.storage),
                persisted.id.clone(),
                persisted.file_key.clone(),
                persisted.filename.clone(),
            );
        }

        tracing::info!(
            "✅ Upload complete: room={} file={} ({} bytes)",
            room_id,
            persisted.id,
            file_size
        );

        Ok(persisted)
    }

    /// Abort is unconditional: a missing handle is already-aborted.
    pub async fn abort(&self, upload_id: &str, file_key: &str) -> Result<(), AppError> {
        self.storage
            .abort_multipart_upload(file_key, upload_id)
            .await
            .map_err(|e| {
                tracing::error!("Abort of {} failed: {}", file_key, e);
                AppError::Internal("Failed to abort upload".to_string())
            })
    }

    /// Single-PUT variant for small files; same quota gates, one URL.
    pub async fn presign_single_put(
        &self,
        room_id: &str,
        filename: &str,
        file_size: i64,
    ) -> Result<(String, String, String), AppError> {
        validate_filename(filename).map_err(|e| AppError::BadRequest(e.to_string()))?;
        if file_size <= 0 {
            return Err(AppError::BadRequest("File size must be positive".to_string()));
        }

        let room = self.load_live_room(room_id).await?;
        QuotaEngine::ensure_quota(&room, file_size)?;

        let file_id = Uuid::new_v4().to_string();
        let file_key = Self::build_file_key(room_id, &file_id, filename);

        let upload_url = self
            .storage
            .presign_put(&file_key, self.config.upload_url_ttl)
            .await
            .map_err(|e| {
                tracing::error!("Failed to presign PUT for {}: {}", file_key, e);
                AppError::Internal("Failed to presign upload".to_string())
            })?;

        Ok((upload_url, file_id, file_key))
    }

    /// Author-side metadata edit: landing URL and description.
    pub async fn update_file(
        &self,
        file_id: &str,
        target_url: Option<String>,
        description: Option<String>,
    ) -> Result<files::Model, AppError> {
        if let Some(ref url) = target_url {
            let parsed = url::Url::parse(url)
                .map_err(|_| AppError::BadRequest("Invalid target URL".to_string()))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(AppError::BadRequest(
                    "Target URL must be http or https".to_string(),
                ));
            }
        }

        let file = Files::find_by_id(file_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if file.is_destroyed() {
            return Err(AppError::Gone("File has been destroyed".to_string()));
        }

        let mut active: files::ActiveModel = file.into();
        if target_url.is_some() {
            active.target_url = Set(target_url);
        }
        if description.is_some() {
            active.description = Set(description);
        }

        Ok(active.update(&self.db).await?)
    }

    /// Author-side delete of a single live file.
    pub async fn delete_file(&self, file_id: &str) -> Result<files::Model, AppError> {
        let file = Files::find_by_id(file_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if let Err(e) = self.storage.delete_object(&file.file_key).await {
            tracing::warn!("Failed to delete blob {}: {}", file.file_key, e);
        }

        Files::delete_by_id(&file.id).exec(&self.db).await?;
        QuotaEngine::record_removal(&self.db, &file.room_id, file.size_bytes).await?;

        // Keep the burn countdown honest when an author retracts a file.
        let room = Rooms::find_by_id(&file.room_id).one(&self.db).await?;
        if let Some(room) = room {
            if room.is_burn() && room.status == rooms::STATUS_ACTIVE {
                RoomLifecycle::decrement_remaining_files(&self.db, &file.room_id).await?;
            }
        }

        Ok(file)
    }

    /// Room-scoped ownership check used by the file-level author routes.
    pub async fn find_file(&self, file_id: &str) -> Result<files::Model, AppError> {
        Files::find_by_id(file_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// All live files of a room, oldest first.
    pub async fn list_room_files(&self, room_id: &str) -> Result<Vec<files::Model>, AppError> {
        use sea_orm::QueryOrder;
        Ok(Files::find()
            .filter(files::Column::RoomId.eq(room_id))
            .filter(files::Column::FileStatus.eq(files::STATUS_LIVE))
            .order_by_asc(files::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }
}
