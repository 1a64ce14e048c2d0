use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    TransactionTrait,
};
use std::time::Duration;

pub struct PresenceService;

impl PresenceService {
    /// Record a heartbeat: `last_seen_at = now`, `status = active`. Safe to
    /// call concurrently; the conflict path is an atomic update.
    pub async fn upsert(
        db: &DatabaseConnection,
        room_id: &str,
        device_id: &str,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let row = room_presence::ActiveModel {
            room_id: Set(room_id.to_string()),
            device_id: Set(device_id.to_string()),
            is_author: Set(false),
            status: Set(room_presence::STATUS_ACTIVE.to_string()),
            last_seen_at: Set(now),
            joined_at: Set(now),
        };

        RoomPresence::insert(row)
            .on_conflict(
                OnConflict::columns([
                    room_presence::Column::RoomId,
                    room_presence::Column::DeviceId,
                ])
                .update_columns([
                    room_presence::Column::Status,
                    room_presence::Column::LastSeenAt,
                ])
                .to_owned(),
            )
            .exec(db)
            .await?;

        Ok(())
    }

    /// sendBeacon-style leave. Only flips active -> left; a stale row stays
    /// as history.
    pub async fn mark_left(
        db: &DatabaseConnection,
        room_id: &str,
        device_id: &str,
    ) -> Result<(), AppError> {
        RoomPresence::update_many()
            .col_expr(
                room_presence::Column::Status,
                Expr::value(room_presence::STATUS_LEFT),
            )
            .filter(room_presence::Column::RoomId.eq(room_id))
            .filter(room_presence::Column::DeviceId.eq(device_id))
            .filter(room_presence::Column::Status.eq(room_presence::STATUS_ACTIVE))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Guests currently inside the active window. Author rows (historical
    /// data only; authors are identified by token) never count.
    pub async fn count_active_guests(
        db: &DatabaseConnection,
        room_id: &str,
        active_window: Duration,
        exclude_device: Option<&str>,
    ) -> Result<u64, AppError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(active_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        let mut query = RoomPresence::find()
            .filter(room_presence::Column::RoomId.eq(room_id))
            .filter(room_presence::Column::IsAuthor.eq(false))
            .filter(room_presence::Column::Status.eq(room_presence::STATUS_ACTIVE))
            .filter(room_presence::Column::LastSeenAt.gte(cutoff));

        if let Some(device) = exclude_device {
            query = query.filter(room_presence::Column::DeviceId.ne(device));
        }

        Ok(query.count(db).await?)
    }

    /// Idempotent, race-free guest-number assignment. Same (room, device)
    /// always yields the same number for the lifetime of the room.
    ///
    /// Two reads and one atomic increment inside a transaction. A concurrent
    /// first-join for the same device loses the index insert and reads the
    /// winner's number instead.
    pub async fn assign_guest_number(
        db: &DatabaseConnection,
        room_id: &str,
        device_id: &str,
    ) -> Result<i32, AppError> {
        let txn = db.begin().await?;

        if let Some(existing) =
            RoomUserIndex::find_by_id((room_id.to_string(), device_id.to_string()))
                .one(&txn)
                .await?
        {
            txn.commit().await?;
            return Ok(existing.user_number);
        }

        // Reserve the next number. The counter row may not exist yet.
        let updated = RoomUserCounter::update_many()
            .col_expr(
                room_user_counter::Column::Counter,
                Expr::col(room_user_counter::Column::Counter).add(1),
            )
            .filter(room_user_counter::Column::RoomId.eq(room_id))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            let seed = room_user_counter::ActiveModel {
                room_id: Set(room_id.to_string()),
                counter: Set(1),
            };
            match RoomUserCounter::insert(seed)
                .on_conflict(
                    OnConflict::column(room_user_counter::Column::RoomId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec(&txn)
                .await
            {
                Ok(_) => {}
                // Lost the seed race: someone else created the counter row.
                Err(DbErr::RecordNotInserted) => {
                    RoomUserCounter::update_many()
                        .col_expr(
                            room_user_counter::Column::Counter,
                            Expr::col(room_user_counter::Column::Counter).add(1),
                        )
                        .filter(room_user_counter::Column::RoomId.eq(room_id))
                        .exec(&txn)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let counter = RoomUserCounter::find_by_id(room_id)
            .one(&txn)
            .await?
            .map(|c| c.counter)
            .ok_or_else(|| AppError::Internal("Guest counter row vanished".to_string()))?;

        let index_row = room_user_index::ActiveModel {
            room_id: Set(room_id.to_string()),
            device_id: Set(device_id.to_string()),
            user_number: Set(counter),
            created_at: Set(Utc::now()),
        };

        let assigned = match RoomUserIndex::insert(index_row)
            .on_conflict(
                OnConflict::columns([
                    room_user_index::Column::RoomId,
                    room_user_index::Column::DeviceId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&txn)
            .await
        {
            Ok(_) => counter,
            // Concurrent insert for the same device won: return its number.
            Err(DbErr::RecordNotInserted) => {
                RoomUserIndex::find_by_id((room_id.to_string(), device_id.to_string()))
                    .one(&txn)
                    .await?
                    .map(|idx| idx.user_number)
                    .ok_or_else(|| {
                        AppError::Internal("Guest index row vanished mid-assignment".to_string())
                    })?
            }
            Err(e) => return Err(e.into()),
        };

        txn.commit().await?;
        Ok(assigned)
    }

    /// Read-only lookup for activity labeling; None for devices that never
    /// joined.
    pub async fn guest_number(
        db: &DatabaseConnection,
        room_id: &str,
        device_id: &str,
    ) -> Result<Option<i32>, AppError> {
        Ok(
            RoomUserIndex::find_by_id((room_id.to_string(), device_id.to_string()))
                .one(db)
                .await?
                .map(|idx| idx.user_number),
        )
    }
}
