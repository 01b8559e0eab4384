use std::time::Duration;

use pilgrim_core::config::{ConfigManager, PilgrimAppConfig};

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Mongo,
}

impl StoreKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => StoreKind::Mongo,
            _ => StoreKind::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalingGatewayConfig {
    pub address: String,
    pub port: u16,
    pub store: StoreKind,
    pub mongo_url: Option<String>,
    pub mongo_database: String,
    /// 管理员/协调员账户集合
    pub staff_collection: String,
    /// 朝圣者账户集合
    pub pilgrim_collection: String,
    pub call_collection: String,
    /// 未设置时响铃中的通话不会被自动结束
    pub ring_timeout: Option<Duration>,
}

impl Default for SignalingGatewayConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3000,
            store: StoreKind::Memory,
            mongo_url: None,
            mongo_database: "pilgrim".to_string(),
            staff_collection: "users".to_string(),
            pilgrim_collection: "pilgrims".to_string(),
            call_collection: "call_histories".to_string(),
            ring_timeout: None,
        }
    }
}

impl SignalingGatewayConfig {
    pub fn from_app_config(app: &PilgrimAppConfig) -> Self {
        let defaults = Self::default();
        let service = app.signaling_gateway_service();

        let store = ConfigManager::env_override("SIGNALING_GATEWAY_STORE")
            .or(service.store)
            .map(|raw| StoreKind::parse(&raw))
            .unwrap_or(StoreKind::Memory);

        let mongo_profile = service
            .mongodb
            .as_deref()
            .and_then(|name| app.mongodb_profile(name))
            .cloned();

        let mongo_url = ConfigManager::env_override("SIGNALING_GATEWAY_MONGO_URL")
            .or_else(|| mongo_profile.as_ref().map(|p| p.url.clone()));

        let mongo_database = mongo_profile
            .and_then(|p| p.database)
            .unwrap_or(defaults.mongo_database);

        let ring_timeout = ConfigManager::env_override_u64("SIGNALING_GATEWAY_RING_TIMEOUT_SECS")
            .or(service.ring_timeout_seconds)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            address: app.server.address.clone(),
            port: app.server.port,
            store,
            mongo_url,
            mongo_database,
            staff_collection: service
                .staff_collection
                .unwrap_or(defaults.staff_collection),
            pilgrim_collection: service
                .pilgrim_collection
                .unwrap_or(defaults.pilgrim_collection),
            call_collection: service.call_collection.unwrap_or(defaults.call_collection),
            ring_timeout,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
