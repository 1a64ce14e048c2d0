pub mod prelude;

pub mod access_logs;
pub mod files;
pub mod room_presence;
pub mod room_secrets;
pub mod room_user_counter;
pub mod room_user_index;
pub mod rooms;
