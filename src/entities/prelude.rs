pub use super::access_logs::Entity as AccessLogs;
pub use super::files::Entity as Files;
pub use super::room_presence::Entity as RoomPresence;
pub use super::room_secrets::Entity as RoomSecrets;
pub use super::room_user_counter::Entity as RoomUserCounter;
pub use super::room_user_index::Entity as RoomUserIndex;
pub use super::rooms::Entity as Rooms;
