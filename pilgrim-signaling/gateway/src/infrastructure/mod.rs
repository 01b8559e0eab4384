pub mod persistence;
pub mod registry;

pub use registry::{BindOutcome, RoomRegistry};
