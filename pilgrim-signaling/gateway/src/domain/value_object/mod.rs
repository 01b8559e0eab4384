pub mod ids;
pub mod role;
pub mod room_key;

pub use ids::{CallId, ConnectionId, GroupId, UserId};
pub use role::Role;
pub use room_key::RoomKey;
