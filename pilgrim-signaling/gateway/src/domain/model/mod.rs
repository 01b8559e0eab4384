pub mod call_record;
pub mod directory;
pub mod session;

pub use call_record::{CallRecord, CallStatus, CallTransition, CallType};
pub use directory::{AccountRecord, DirectoryEntry};
pub use session::{NavBeacon, Session};
