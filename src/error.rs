//! Pilgrim Core 错误工具模块
//!
//! - 定义统一的错误码与错误类型
//! - 为基础设施层提供便捷的错误转换工具

use std::fmt;

/// 业务错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 参数缺失或格式错误
    InvalidParameter,
    /// 目标不存在
    NotFound,
    /// 状态机不允许的迁移
    InvalidStateTransition,
    /// 配置错误
    ConfigurationError,
    /// 持久化失败
    PersistenceError,
    /// 推送渠道失败
    PushDeliveryError,
    /// 依赖服务不可用
    ServiceUnavailable,
    /// 内部错误
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCode::PushDeliveryError => "PUSH_DELIVERY_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统一错误类型
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}{}", detail_suffix(.details))]
pub struct PilgrimError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl PilgrimError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

fn detail_suffix(details: &Option<String>) -> String {
    details
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, PilgrimError>;

/// 错误构建器
pub struct ErrorBuilder {
    code: ErrorCode,
    message: String,
    details: Option<String>,
}

impl ErrorBuilder {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn build_error(self) -> PilgrimError {
        PilgrimError {
            code: self.code,
            message: self.message,
            details: self.details,
        }
    }
}

/// 将基础设施错误映射为业务错误
pub fn map_infra_error<E: fmt::Display>(err: E, code: ErrorCode, message: &str) -> PilgrimError {
    ErrorBuilder::new(code, message)
        .details(err.to_string())
        .build_error()
}

/// 基础设施结果扩展：`mongo.find_one(..).await.into_pilgrim(..)?`
pub trait InfraResultExt<T> {
    fn into_pilgrim(self, code: ErrorCode, message: &str) -> Result<T>;
}

impl<T, E: fmt::Display> InfraResultExt<T> for std::result::Result<T, E> {
    fn into_pilgrim(self, code: ErrorCode, message: &str) -> Result<T> {
        self.map_err(|err| map_infra_error(err, code, message))
    }
}
