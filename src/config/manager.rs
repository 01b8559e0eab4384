//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 获取当前运行环境
//! - 加载环境特定配置并合并到基础配置

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{PilgrimAppConfig, load_toml_value, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 PILGRIM_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("PILGRIM_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中；文件不存在时不做任何修改
    pub fn load_environment_config(base_config: &mut PilgrimAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        Self::apply_overlay_file(base_config, Path::new(&env_config_path))
    }

    /// 将单个 TOML 覆盖文件合并到已有配置
    pub fn apply_overlay_file(base_config: &mut PilgrimAppConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let overlay = load_toml_value(path)?;
        let mut merged = Value::try_from(&*base_config)
            .context("unable to serialize current configuration")?;
        merge_value(&mut merged, overlay);

        *base_config = merged
            .try_into()
            .with_context(|| format!("invalid environment config: {}", path.display()))?;
        Ok(())
    }

    /// 读取字符串类型的环境变量覆盖
    pub fn env_override(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 读取数值类型的环境变量覆盖，解析失败时视为未设置
    pub fn env_override_u64(key: &str) -> Option<u64> {
        Self::env_override(key).and_then(|value| value.parse::<u64>().ok())
    }
}
