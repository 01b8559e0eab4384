pub mod call_outcome;
pub mod directory_service;

pub use call_outcome::classify_call_end;
pub use directory_service::DirectoryService;
