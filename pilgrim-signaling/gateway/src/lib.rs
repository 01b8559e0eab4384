pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use config::SignalingGatewayConfig;
pub use service::ApplicationBootstrap;
