pub mod memory;
pub mod mongo;

pub use memory::{InMemoryAccountStore, InMemoryCallRecordRepository};
pub use mongo::{MongoAccountStore, MongoCallRecordRepository, connect_database};
