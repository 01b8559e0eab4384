//! Pilgrim Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖
//! - 信令网关、推送服务、MongoDB 等配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<PilgrimAppConfig> = OnceLock::new();

/// 服务监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default = "default_true")]
    pub with_file: bool,
    #[serde(default = "default_true")]
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: false,
            with_file: true,
            with_line_number: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// MongoDB 实例配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MongoInstanceConfig {
    /// MongoDB 连接 URL
    pub url: String,
    /// 数据库名称
    #[serde(default)]
    pub database: Option<String>,
}

/// 信令网关服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignalingGatewayServiceConfig {
    /// 存储类型：memory | mongo
    #[serde(default)]
    pub store: Option<String>,
    /// 引用的 MongoDB 配置名
    #[serde(default)]
    pub mongodb: Option<String>,
    /// 工作人员（管理员/协调员）账户集合
    #[serde(default)]
    pub staff_collection: Option<String>,
    /// 朝圣者账户集合
    #[serde(default)]
    pub pilgrim_collection: Option<String>,
    /// 通话记录集合
    #[serde(default)]
    pub call_collection: Option<String>,
    /// 响铃超时（秒），未设置则不自动结束响铃中的通话
    #[serde(default)]
    pub ring_timeout_seconds: Option<u64>,
}

/// 推送服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushServiceConfig {
    /// 推送渠道：fcm | noop
    #[serde(default)]
    pub provider: Option<String>,
    /// FCM 项目 ID
    #[serde(default)]
    pub fcm_project_id: Option<String>,
    /// 服务账号 JSON 文件路径
    #[serde(default)]
    pub fcm_credentials_path: Option<String>,
    /// 固定 access token（调试用，优先于服务账号）
    #[serde(default)]
    pub fcm_access_token: Option<String>,
    /// 单次请求超时（毫秒）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 服务配置集合
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub signaling_gateway: Option<SignalingGatewayServiceConfig>,
    #[serde(default)]
    pub push: Option<PushServiceConfig>,
}

/// Pilgrim 应用配置主结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PilgrimAppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// MongoDB 配置映射
    #[serde(default)]
    pub mongodb: HashMap<String, MongoInstanceConfig>,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl PilgrimAppConfig {
    /// 获取 MongoDB 配置
    pub fn mongodb_profile(&self, name: &str) -> Option<&MongoInstanceConfig> {
        self.mongodb.get(name)
    }

    /// 获取信令网关服务配置
    pub fn signaling_gateway_service(&self) -> SignalingGatewayServiceConfig {
        self.services.signaling_gateway.clone().unwrap_or_default()
    }

    /// 获取推送服务配置
    pub fn push_service(&self) -> PushServiceConfig {
        self.services.push.clone().unwrap_or_default()
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.server.address.is_empty() {
            self.server.address = default_address();
        }
        if self.server.port == 0 {
            self.server.port = default_port();
        }
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static PilgrimAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        cfg
    })
}

/// 获取应用配置（未加载时返回 None）
pub fn app_config() -> Option<&'static PilgrimAppConfig> {
    APP_CONFIG.get()
}

fn load_with_fallback(candidates: &[PathBuf]) -> PilgrimAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    PilgrimAppConfig::default()
}

/// 从源加载配置（文件或目录）
pub fn load_config_from_source(path: &Path) -> Result<PilgrimAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

fn load_config_from_file(path: &Path) -> Result<PilgrimAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let mut cfg: PilgrimAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 目录布局：base.toml + shared/ + services/ + overrides/
fn load_config_from_directory(path: &Path) -> Result<PilgrimAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;
    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    for sub in ["shared", "services", "overrides"] {
        merge_directory(&mut merged, &path.join(sub))?;
    }

    let cfg: PilgrimAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut fragments = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    fragments.sort();

    for fragment in fragments {
        let value = load_toml_value(&fragment)?;
        merge_value(root, value);
    }

    Ok(())
}

pub(crate) fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))
}

/// 深度合并：表逐键合并，其余类型由 overlay 覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => *base = other,
    }
}
