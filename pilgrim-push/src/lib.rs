//! Pilgrim 推送分发
//!
//! 将通知投递到一组设备 token：来电等场景使用纯数据载荷，
//! 其余场景使用可见通知。

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{PushConfig, PushProviderKind};
pub use domain::model::{PushKind, PushNotification, PushPayload, PushReport};
pub use domain::repository::PushSender;
pub use domain::service::PushDispatcher;
pub use infrastructure::{FcmPushSender, NoopPushSender, build_push_sender};
