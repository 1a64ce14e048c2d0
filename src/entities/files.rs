use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_LIVE: &str = "live";
pub const STATUS_DESTROYED: &str = "destroyed";

pub const SCAN_UNKNOWN: &str = "unknown";
pub const SCAN_SAFE: &str = "safe";
pub const SCAN_RISKY: &str = "risky";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub room_id: String,
    pub filename: String,
    /// Object-store key, `{roomId}/{fileId}_{filename}`.
    #[sea_orm(unique)]
    pub file_key: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub download_count: i32,
    pub file_status: String,
    /// Per-file one-time-download override, orthogonal to room mode.
    pub burn_after_download: bool,
    pub scan_status: String,
    pub scan_result: Option<String>,
    pub message: Option<String>,
    pub target_url: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn is_destroyed(&self) -> bool {
        self.file_status == STATUS_DESTROYED
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rooms::Entity",
        from = "Column::RoomId",
        to = "super::rooms::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Room,
}

impl Related<super::rooms::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Room.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
