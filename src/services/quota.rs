use crate::api::error::AppError;
use crate::entities::rooms;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaError {
    TooManyFiles,
    SizeExceeded,
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::TooManyFiles => {
                AppError::PayloadTooLarge("Room file-count quota exceeded".to_string())
            }
            QuotaError::SizeExceeded => {
                AppError::PayloadTooLarge("Room size quota exceeded".to_string())
            }
        }
    }
}

pub struct QuotaEngine;

impl QuotaEngine {
    /// Projected-usage check. Called twice per upload: at initiate (cheap
    /// reject before any object-store work) and again at complete (guard
    /// against concurrent uploads racing the same window). A minor overshoot
    /// within a single complete is tolerated and surfaced as 413 next time.
    pub fn ensure_quota(room: &rooms::Model, incoming_bytes: i64) -> Result<(), QuotaError> {
        if room.file_count + 1 > room.max_files {
            return Err(QuotaError::TooManyFiles);
        }
        if room.total_size_bytes + incoming_bytes > room.max_total_size_bytes {
            return Err(QuotaError::SizeExceeded);
        }
        Ok(())
    }

    /// Atomic usage bump after a completed upload.
    pub async fn record_upload(
        db: &DatabaseConnection,
        room_id: &str,
        bytes: i64,
    ) -> Result<(), AppError> {
        rooms::Entity::update_many()
            .col_expr(
                rooms::Column::FileCount,
                Expr::col(rooms::Column::FileCount).add(1),
            )
            .col_expr(
                rooms::Column::TotalSizeBytes,
                Expr::col(rooms::Column::TotalSizeBytes).add(bytes),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Atomic usage release when a file is destroyed or deleted.
    pub async fn record_removal(
        db: &DatabaseConnection,
        room_id: &str,
        bytes: i64,
    ) -> Result<(), AppError> {
        rooms::Entity::update_many()
            .col_expr(
                rooms::Column::FileCount,
                Expr::col(rooms::Column::FileCount).sub(1),
            )
            .col_expr(
                rooms::Column::TotalSizeBytes,
                Expr::col(rooms::Column::TotalSizeBytes).sub(bytes),
            )
            .filter(rooms::Column::Id.eq(room_id))
            .filter(rooms::Column::FileCount.gt(0))
            .exec(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn room(file_count: i32, total: i64) -> rooms::Model {
        rooms::Model {
            id: "room".to_string(),
            name: "r".to_string(),
            author_name: "a".to_string(),
            mode: rooms::MODE_NORMAL.to_string(),
            status: rooms::STATUS_ACTIVE.to_string(),
            expires_at: Utc::now(),
            is_permanent: false,
            capacity: 999,
            remaining_files: 0,
            active_downloads: 0,
            last_download_activity: None,
            termination_started_at: None,
            file_count,
            total_size_bytes: total,
            max_files: 100,
            max_total_size_bytes: 4 * 1024 * 1024 * 1024,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_quota_admits_within_caps() {
        assert!(QuotaEngine::ensure_quota(&room(0, 0), 1024).is_ok());
        assert!(QuotaEngine::ensure_quota(&room(99, 0), 1024).is_ok());
    }

    #[test]
    fn test_file_count_cap() {
        assert_eq!(
            QuotaEngine::ensure_quota(&room(100, 0), 1),
            Err(QuotaError::TooManyFiles)
        );
    }

    #[test]
    fn test_size_cap_is_projected() {
        let cap = 4 * 1024 * 1024 * 1024;
        assert!(QuotaEngine::ensure_quota(&room(0, cap - 10), 10).is_ok());
        assert_eq!(
            QuotaEngine::ensure_quota(&room(0, cap - 10), 11),
            Err(QuotaError::SizeExceeded)
        );
    }
}
