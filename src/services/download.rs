use crate::api::error::AppError;
use crate::config::AppConfig;
use crate::entities::{prelude::*, *};
use crate::services::access_log::{AccessLogService, ClientMeta};
use crate::services::lifecycle::RoomLifecycle;
use crate::services::quota::QuotaEngine;
use crate::services::storage::StorageService;
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;

/// What a successful download authorization hands back to the client.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub signed_url: String,
    pub filename: String,
    pub burn_mode: bool,
    pub room_status: String,
}

/// Authorization, signed-URL minting, the download refcount, and burn
/// scheduling. The one rule everything here serves: a burn file is
/// downloaded at most once, and a room never destroys under a live
/// download.
pub struct DownloadCoordinator {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    lifecycle: Arc<RoomLifecycle>,
    access_log: Arc<AccessLogService>,
    config: AppConfig,
}

impl DownloadCoordinator {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        lifecycle: Arc<RoomLifecycle>,
        access_log: Arc<AccessLogService>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            lifecycle,
            access_log,
            config,
        }
    }

    /// Check file and room state, then mint a short-lived signed URL.
    /// The caller has already authorized the principal for the room.
    pub async fn grant(&self, file_key: &str) -> Result<DownloadGrant, AppError> {
        let file = Files::find()
            .filter(files::Column::FileKey.eq(file_key))
            .one(&self.db)
            .await?;

        let Some(file) = file else {
            // A consumed burn file loses its row shortly after destruction;
            // report Gone rather than Not Found when the room says so.
            if let Some(room_id) = file_key.split('/').next() {
                if let Some(room) = Rooms::find_by_id(room_id).one(&self.db).await? {
                    if room.status != rooms::STATUS_ACTIVE {
                        return Err(AppError::Gone("File has been destroyed".to_string()));
                    }
                }
            }
            return Err(AppError::NotFound("File not found".to_string()));
        };

        if file.is_destroyed() {
            return Err(AppError::Gone("File has been destroyed".to_string()));
        }

        let room = Rooms::find_by_id(&file.room_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

        if room.status == rooms::STATUS_DESTROYED {
            return Err(AppError::Gone("Room has been destroyed".to_string()));
        }
        if room.is_expired(Utc::now()) {
            return Err(AppError::Gone("Room has expired".to_string()));
        }

        let burn = room.is_burn() || file.burn_after_download;
        if burn {
            if file.download_count > 0 {
                return Err(AppError::Gone("File already downloaded".to_string()));
            }
            if room.active_downloads > 0 {
                return Err(AppError::Conflict(
                    "A download of this room is already in progress".to_string(),
                ));
            }
        }

        let disposition = attachment_disposition(&file.filename);
        let signed_url = self
            .storage
            .presign_get(&file.file_key, self.config.download_url_ttl, &disposition)
            .await
            .map_err(|e| {
                tracing::error!("Failed to presign {}: {}", file.file_key, e);
                AppError::Internal("Failed to generate download URL".to_string())
            })?;

        Ok(DownloadGrant {
            signed_url,
            filename: file.filename,
            burn_mode: burn,
            room_status: room.status,
        })
    }

    /// `/download/start`: take a slot on the room's download refcount. The
    /// lifecycle engine will not destroy a terminating room while it is
    /// non-zero.
    pub async fn start(&self, room_id: &str) -> Result<(), AppError> {
        let updated = rooms::Entity::update_many()
            .col_expr(
                rooms::Column::ActiveDownloads,
                Expr::col(rooms::Column::ActiveDownloads).add(1),
            )
            .col_expr(
                rooms::Column::LastDownloadActivity,
                Expr::value(Some(Utc::now())),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .filter(rooms::Column::Status.ne(rooms::STATUS_DESTROYED))
            .exec(&self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Err(AppError::NotFound("Room not found".to_string()));
        }
        Ok(())
    }

    /// `/download/end`: release the slot; on success, count the download,
    /// write the once-per-device log and arm burn destruction.
    pub async fn end(
        &self,
        room_id: &str,
        file_id: &str,
        device_id: Option<&str>,
        meta: &ClientMeta,
        success: bool,
    ) -> Result<(), AppError> {
        rooms::Entity::update_many()
            .col_expr(
                rooms::Column::ActiveDownloads,
                Expr::col(rooms::Column::ActiveDownloads).sub(1),
            )
            .col_expr(
                rooms::Column::LastDownloadActivity,
                Expr::value(Some(Utc::now())),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .filter(rooms::Column::ActiveDownloads.gt(0))
            .exec(&self.db)
            .await?;

        if !success {
            return Ok(());
        }

        let Some(file) = Files::find_by_id(file_id)
            .filter(files::Column::RoomId.eq(room_id))
            .one(&self.db)
            .await?
        else {
            // Already destroyed by a competing end-call; nothing to count.
            return Ok(());
        };

        let room = Rooms::find_by_id(room_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

        let burn = room.is_burn() || file.burn_after_download;

        // Burn files take the counter 0 -> 1 exactly once; repeated or
        // racing end-calls lose the conditional update and change nothing.
        let counted = if burn {
            let res = files::Entity::update_many()
                .col_expr(
                    files::Column::DownloadCount,
                    Expr::col(files::Column::DownloadCount).add(1),
                )
                .filter(files::Column::Id.eq(file_id))
                .filter(files::Column::DownloadCount.eq(0))
                .exec(&self.db)
                .await?;
            res.rows_affected > 0
        } else {
            files::Entity::update_many()
                .col_expr(
                    files::Column::DownloadCount,
                    Expr::col(files::Column::DownloadCount).add(1),
                )
                .filter(files::Column::Id.eq(file_id))
                .exec(&self.db)
                .await?;
            true
        };

        if let Some(device) = device_id {
            let already =
                AccessLogService::has_event(&self.db, room_id, device, access_logs::EVENT_FILE_DOWNLOAD)
                    .await?;
            if !already {
                self.access_log
                    .log_now(room_id, access_logs::EVENT_FILE_DOWNLOAD, meta, Some(device))
                    .await
                    .ok();
            }
        }

        if burn && counted {
            self.schedule_burn_destruction(file, room.is_burn());
        }

        Ok(())
    }

    /// After a grace period (the client is still streaming straight from
    /// the store), destroy the consumed file and let the room follow if it
    /// was the last one.
    fn schedule_burn_destruction(&self, file: files::Model, room_is_burn: bool) {
        let db = self.db.clone();
        let storage = Arc::clone(&self.storage);
        let lifecycle = Arc::clone(&self.lifecycle);
        let delay = self.config.burn_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(e) = storage.delete_object(&file.file_key).await {
                tracing::warn!("Burn delete of blob {} failed: {}", file.file_key, e);
            }

            // Mark destroyed before removing the row so a concurrent reader
            // observes Gone rather than a live file.
            let marked = files::Entity::update_many()
                .col_expr(
                    files::Column::FileStatus,
                    Expr::value(files::STATUS_DESTROYED),
                )
                .filter(files::Column::Id.eq(&file.id))
                .filter(files::Column::FileStatus.eq(files::STATUS_LIVE))
                .exec(&db)
                .await;

            match marked {
                Ok(res) if res.rows_affected > 0 => {}
                Ok(_) => return, // someone else burned it
                Err(e) => {
                    tracing::error!("Failed to mark file {} destroyed: {}", file.id, e);
                    return;
                }
            }

            if let Err(e) = Files::delete_by_id(&file.id).exec(&db).await {
                tracing::error!("Failed to delete burned file row {}: {}", file.id, e);
            }

            if let Err(e) = QuotaEngine::record_removal(&db, &file.room_id, file.size_bytes).await {
                tracing::error!("Failed to release quota for {}: {}", file.id, e);
            }

            tracing::info!("🔥 Burned file {} ({})", file.id, file.filename);

            if room_is_burn {
                match RoomLifecycle::decrement_remaining_files(&db, &file.room_id).await {
                    Ok(0) => {
                        if let Err(e) = lifecycle.begin_termination(&file.room_id).await {
                            tracing::error!(
                                "Failed to start termination of {}: {}",
                                file.room_id,
                                e
                            );
                        }
                    }
                    Ok(remaining) => {
                        tracing::debug!("Room {} has {} file(s) left", file.room_id, remaining);
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to decrement remaining_files for {}: {}",
                            file.room_id,
                            e
                        );
                    }
                }
            }
        });
    }

    /// Archive-path consumption marker: count each file once and, in burn
    /// rooms, drain `remaining_files` accordingly.
    pub async fn bulk_mark(&self, room_id: &str, file_ids: &[String]) -> Result<u64, AppError> {
        let room = Rooms::find_by_id(room_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

        let mut marked = 0u64;
        for file_id in file_ids {
            let res = files::Entity::update_many()
                .col_expr(
                    files::Column::DownloadCount,
                    Expr::col(files::Column::DownloadCount).add(1),
                )
                .filter(files::Column::Id.eq(file_id))
                .filter(files::Column::RoomId.eq(room_id))
                .filter(files::Column::FileStatus.eq(files::STATUS_LIVE))
                .exec(&self.db)
                .await?;

            if res.rows_affected == 0 {
                continue;
            }
            marked += 1;

            if room.is_burn() {
                let remaining =
                    RoomLifecycle::decrement_remaining_files(&self.db, room_id).await?;
                if remaining == 0 {
                    self.lifecycle.begin_termination(room_id).await?;
                }
            }
        }

        Ok(marked)
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 encoded
/// full name, the way browsers actually want it.
pub fn attachment_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
