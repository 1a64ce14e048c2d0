use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Room modes. "burn" makes every file destroy itself after one successful
/// download; when all files are consumed the room itself is destroyed.
pub const MODE_NORMAL: &str = "normal";
pub const MODE_BURN: &str = "burn";

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_TERMINATING: &str = "terminating";
pub const STATUS_DESTROYED: &str = "destroyed";

/// Capacity values at or above this are treated as unlimited.
pub const UNLIMITED_CAPACITY: i32 = 999;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rooms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub author_name: String,
    pub mode: String,
    pub status: String,
    pub expires_at: DateTimeUtc,
    pub is_permanent: bool,
    pub capacity: i32,
    /// Live-file countdown for burn rooms; unused in normal mode.
    pub remaining_files: i32,
    /// Refcount of in-flight downloads. The lifecycle engine never destroys
    /// a terminating room while this is non-zero.
    pub active_downloads: i32,
    pub last_download_activity: Option<DateTimeUtc>,
    pub termination_started_at: Option<DateTimeUtc>,
    pub file_count: i32,
    pub total_size_bytes: i64,
    pub max_files: i32,
    pub max_total_size_bytes: i64,
    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn is_burn(&self) -> bool {
        self.mode == MODE_BURN
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity >= UNLIMITED_CAPACITY
    }

    pub fn is_expired(&self, now: DateTimeUtc) -> bool {
        !self.is_permanent && self.expires_at < now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::files::Entity")]
    Files,
    #[sea_orm(has_many = "super::room_presence::Entity")]
    Presence,
    #[sea_orm(has_many = "super::access_logs::Entity")]
    AccessLogs,
    #[sea_orm(has_one = "super::room_secrets::Entity")]
    Secrets,
}

impl Related<super::files::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Files.def()
    }
}

impl Related<super::room_presence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Presence.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
