pub mod http;
pub mod ws;

pub use http::{AppState, build_router};
