use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::services::storage::StorageService;
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;

/// Room state machine: `active -> terminating -> destroyed`.
///
/// `destroyed` is terminal and is reached only through a conditional update
/// that also requires `active_downloads = 0`, so a terminating room never
/// vanishes under an in-flight download. Countdown timers are process-local;
/// a missed timer is compensated by the reaper once the room expires.
pub struct RoomLifecycle {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    countdown: Duration,
    timers: DashMap<String, tokio::task::JoinHandle<()>>,
}

impl RoomLifecycle {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        countdown: Duration,
    ) -> Self {
        Self {
            db,
            storage,
            countdown,
            timers: DashMap::new(),
        }
    }

    /// Atomic bump of the burn counter on upload complete.
    pub async fn increment_remaining_files(
        db: &DatabaseConnection,
        room_id: &str,
    ) -> Result<(), AppError> {
        rooms::Entity::update_many()
            .col_expr(
                rooms::Column::RemainingFiles,
                Expr::col(rooms::Column::RemainingFiles).add(1),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Atomic decrement, floored at zero. Returns the new value.
    pub async fn decrement_remaining_files(
        db: &DatabaseConnection,
        room_id: &str,
    ) -> Result<i32, AppError> {
        rooms::Entity::update_many()
            .col_expr(
                rooms::Column::RemainingFiles,
                Expr::col(rooms::Column::RemainingFiles).sub(1),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .filter(rooms::Column::RemainingFiles.gt(0))
            .exec(db)
            .await?;

        let remaining = Rooms::find_by_id(room_id)
            .one(db)
            .await?
            .map(|r| r.remaining_files)
            .unwrap_or(0);
        Ok(remaining)
    }

    /// Burn exhaustion entry point: flip `active -> terminating` and start
    /// the destruction countdown. Re-entrant safe; losing the transition
    /// race just means another caller already armed the timer.
    pub async fn begin_termination(self: &Arc<Self>, room_id: &str) -> Result<(), AppError> {
        let updated = rooms::Entity::update_many()
            .col_expr(rooms::Column::Status, Expr::value(rooms::STATUS_TERMINATING))
            .col_expr(
                rooms::Column::TerminationStartedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .filter(rooms::Column::Status.eq(rooms::STATUS_ACTIVE))
            .exec(&self.db)
            .await?;

        if updated.rows_affected > 0 {
            tracing::info!("🔥 Room {} is terminating, countdown armed", room_id);
            self.schedule_destruction(room_id.to_string(), self.countdown);
        } else if !self.timers.contains_key(room_id) {
            // Terminating already (e.g. after a restart) but no timer armed.
            self.schedule_destruction(room_id.to_string(), self.countdown);
        }

        Ok(())
    }

    fn schedule_destruction(self: &Arc<Self>, room_id: String, delay: Duration) {
        let engine = Arc::clone(self);
        let key = room_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.destruction_check(room_id).await;
        });

        if let Some(previous) = self.timers.insert(key, handle) {
            previous.abort();
        }
    }

    async fn destruction_check(self: Arc<Self>, room_id: String) {
        let room = match Rooms::find_by_id(&room_id).one(&self.db).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                self.timers.remove(&room_id);
                return;
            }
            Err(e) => {
                tracing::error!("Destruction check failed to load room {}: {}", room_id, e);
                self.schedule_destruction(room_id, self.countdown);
                return;
            }
        };

        if room.status != rooms::STATUS_TERMINATING {
            self.timers.remove(&room_id);
            return;
        }

        if room.active_downloads > 0 {
            tracing::info!(
                "⏳ Room {} still has {} download(s) in flight, rescheduling destruction",
                room_id,
                room.active_downloads
            );
            self.schedule_destruction(room_id, self.countdown);
            return;
        }

        // Claim the terminal transition. Losing here means a download
        // started in the gap or another process got there first.
        let claimed = rooms::Entity::update_many()
            .col_expr(rooms::Column::Status, Expr::value(rooms::STATUS_DESTROYED))
            .filter(rooms::Column::Id.eq(&room_id))
            .filter(rooms::Column::Status.eq(rooms::STATUS_TERMINATING))
            .filter(rooms::Column::ActiveDownloads.eq(0))
            .exec(&self.db)
            .await;

        match claimed {
            Ok(res) if res.rows_affected > 0 => {
                if let Err(e) = self.destroy_room(&room_id).await {
                    tracing::error!("Room {} destruction failed: {}", room_id, e);
                }
                self.timers.remove(&room_id);
            }
            Ok(_) => {
                self.schedule_destruction(room_id, self.countdown);
            }
            Err(e) => {
                tracing::error!("Room {} destroy claim failed: {}", room_id, e);
                self.schedule_destruction(room_id, self.countdown);
            }
        }
    }

    /// Remove a room and everything it owns. Blob deletes are best-effort
    /// (orphans are swept by the reaper); row deletes are ordered leaves
    /// first. Returns the number of file rows removed.
    pub async fn destroy_room(&self, room_id: &str) -> Result<u64, AppError> {
        let files = Files::find()
            .filter(files::Column::RoomId.eq(room_id))
            .all(&self.db)
            .await?;

        for file in &files {
            if let Err(e) = self.storage.delete_object(&file.file_key).await {
                tracing::warn!(
                    "Failed to delete blob {} for dying room {}: {}",
                    file.file_key,
                    room_id,
                    e
                );
            }
        }

        let files_deleted = Files::delete_many()
            .filter(files::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?
            .rows_affected;

        RoomPresence::delete_many()
            .filter(room_presence::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?;
        RoomUserIndex::delete_many()
            .filter(room_user_index::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?;
        RoomUserCounter::delete_many()
            .filter(room_user_counter::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?;
        AccessLogs::delete_many()
            .filter(access_logs::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?;
        RoomSecrets::delete_many()
            .filter(room_secrets::Column::RoomId.eq(room_id))
            .exec(&self.db)
            .await?;
        Rooms::delete_many()
            .filter(rooms::Column::Id.eq(room_id))
            .exec(&self.db)
            .await?;

        if let Some(timer) = self.timers.remove(room_id) {
            timer.1.abort();
        }

        tracing::info!("💥 Room {} destroyed ({} files)", room_id, files_deleted);
        Ok(files_deleted)
    }

    /// Abort all pending countdown timers. Called on graceful shutdown; the
    /// reaper picks up whatever was mid-countdown on the next boot.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}
