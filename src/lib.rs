//! Pilgrim Core 公共库
//!
//! 提供统一的配置加载、错误模型、日志初始化、指标注册和时间工具

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, LoggingConfig, MongoInstanceConfig, PilgrimAppConfig, PushServiceConfig,
    ServerConfig, SignalingGatewayServiceConfig, app_config, load_config,
};
pub use error::*;
pub use utils::*;
