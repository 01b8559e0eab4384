pub mod broadcaster;
pub mod call_history;
mod call_signaling;
pub mod coordinator;

pub use broadcaster::RoomBroadcaster;
pub use call_history::{CallHistoryService, DEFAULT_HISTORY_LIMIT};
pub use coordinator::SessionCoordinator;
