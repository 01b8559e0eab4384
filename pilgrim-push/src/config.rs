use std::time::Duration;

use pilgrim_core::config::{ConfigManager, PilgrimAppConfig};

/// 推送渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushProviderKind {
    Fcm,
    Noop,
}

impl PushProviderKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fcm" | "firebase" => Self::Fcm,
            _ => Self::Noop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub provider: PushProviderKind,
    pub fcm_project_id: Option<String>,
    pub fcm_credentials_path: Option<String>,
    pub fcm_access_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            provider: PushProviderKind::Noop,
            fcm_project_id: None,
            fcm_credentials_path: None,
            fcm_access_token: None,
            request_timeout: Duration::from_millis(5_000),
        }
    }
}

impl PushConfig {
    pub fn from_app_config(app: &PilgrimAppConfig) -> Self {
        let service = app.push_service();

        let provider = ConfigManager::env_override("PUSH_PROVIDER")
            .or(service.provider)
            .map(|raw| PushProviderKind::parse(&raw))
            .unwrap_or(PushProviderKind::Noop);

        let fcm_project_id =
            ConfigManager::env_override("PUSH_FCM_PROJECT_ID").or(service.fcm_project_id);
        let fcm_credentials_path =
            ConfigManager::env_override("PUSH_FCM_CREDENTIALS").or(service.fcm_credentials_path);
        let fcm_access_token =
            ConfigManager::env_override("PUSH_FCM_ACCESS_TOKEN").or(service.fcm_access_token);

        let timeout_ms = ConfigManager::env_override_u64("PUSH_TIMEOUT_MS")
            .or(service.timeout_ms)
            .unwrap_or(5_000);

        Self {
            provider,
            fcm_project_id,
            fcm_credentials_path,
            fcm_access_token,
            request_timeout: Duration::from_millis(timeout_ms),
        }
    }
}
