use crate::api::error::AppError;
use crate::config::AppConfig;
use crate::entities::{prelude::*, rooms};
use crate::services::lifecycle::RoomLifecycle;
use crate::services::storage::StorageService;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReaperReport {
    pub rooms_reaped: u64,
    pub files_deleted: u64,
    pub uploads_aborted: u64,
}

/// Periodic sweep: abort orphaned multipart uploads, then delete expired
/// non-permanent rooms with their blobs. Also the compensator for the burn
/// saga: blobs whose rows vanished mid-destruction get picked up here once
/// the room expires.
pub struct Reaper {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    lifecycle: Arc<RoomLifecycle>,
    config: AppConfig,
}

impl Reaper {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        lifecycle: Arc<RoomLifecycle>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            lifecycle,
            config,
        }
    }

    /// Long-running loop for the `reaper` / `all` service modes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "🧹 Reaper running every {:?} (stale-upload threshold {:?})",
            self.config.reaper_interval,
            self.config.stale_upload_age
        );

        loop {
            tokio::select! {
                _ = sleep(self.config.reaper_interval) => {
                    match self.sweep_once().await {
                        Ok(report) => {
                            if report.rooms_reaped > 0 || report.uploads_aborted > 0 {
                                tracing::info!(
                                    "🧹 Reaper: {} room(s), {} file(s), {} stale upload(s)",
                                    report.rooms_reaped,
                                    report.files_deleted,
                                    report.uploads_aborted
                                );
                            }
                        }
                        Err(e) => tracing::error!("Reaper sweep failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("🧹 Reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One full sweep. Each failure is logged and skipped; the sweep always
    /// runs to the end.
    pub async fn sweep_once(&self) -> Result<ReaperReport, AppError> {
        let mut report = ReaperReport::default();

        // 1. Orphaned multipart uploads: initiations whose client never
        //    completed or aborted.
        match self.storage.list_multipart_uploads().await {
            Ok(uploads) => {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(self.config.stale_upload_age)
                        .unwrap_or_else(|_| chrono::Duration::hours(24));
                for upload in uploads {
                    let Some(initiated) = upload.initiated else {
                        continue;
                    };
                    if initiated >= cutoff {
                        continue;
                    }
                    match self
                        .storage
                        .abort_multipart_upload(&upload.key, &upload.upload_id)
                        .await
                    {
                        Ok(()) => report.uploads_aborted += 1,
                        Err(e) => {
                            tracing::warn!(
                                "Failed to abort stale upload {} ({}): {}",
                                upload.upload_id,
                                upload.key,
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Could not list multipart uploads: {}", e),
        }

        // 2. Expired rooms. Permanent rooms are exempt.
        let expired = Rooms::find()
            .filter(rooms::Column::ExpiresAt.lt(Utc::now()))
            .filter(rooms::Column::IsPermanent.eq(false))
            .all(&self.db)
            .await?;

        for room in expired {
            match self.lifecycle.destroy_room(&room.id).await {
                Ok(files_deleted) => {
                    report.rooms_reaped += 1;
                    report.files_deleted += files_deleted;
                }
                Err(e) => {
                    tracing::error!("Failed to reap expired room {}: {}", room.id, e);
                }
            }
        }

        Ok(report)
    }
}
