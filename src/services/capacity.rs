use crate::api::error::AppError;
use crate::entities::rooms;
use crate::services::presence::PresenceService;
use sea_orm::DatabaseConnection;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Admitted,
    Full,
}

pub struct CapacityGate;

impl CapacityGate {
    /// Admit-or-reject for a join or heartbeat from a non-author device.
    /// The count excludes the requesting device so a rejoining guest never
    /// blocks themselves. On admit, presence is upserted in the same call.
    pub async fn admit(
        db: &DatabaseConnection,
        room: &rooms::Model,
        device_id: &str,
        active_window: Duration,
    ) -> Result<AdmitDecision, AppError> {
        if room.is_unlimited() {
            PresenceService::upsert(db, &room.id, device_id).await?;
            return Ok(AdmitDecision::Admitted);
        }

        let used =
            PresenceService::count_active_guests(db, &room.id, active_window, Some(device_id))
                .await?;

        if used >= room.capacity as u64 {
            tracing::info!(
                room = %room.id,
                used,
                capacity = room.capacity,
                "Room at capacity, rejecting device"
            );
            return Ok(AdmitDecision::Full);
        }

        PresenceService::upsert(db, &room.id, device_id).await?;
        Ok(AdmitDecision::Admitted)
    }

    /// Occupancy gauge for the capacity endpoint.
    pub async fn occupancy(
        db: &DatabaseConnection,
        room: &rooms::Model,
        active_window: Duration,
    ) -> Result<(u64, i32), AppError> {
        let current =
            PresenceService::count_active_guests(db, &room.id, active_window, None).await?;
        Ok((current, room.capacity))
    }
}
