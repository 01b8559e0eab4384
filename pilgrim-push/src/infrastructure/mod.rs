pub mod fcm;
pub mod noop;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{PushConfig, PushProviderKind};
use crate::domain::repository::PushSender;

pub use fcm::FcmPushSender;
pub use noop::NoopPushSender;

pub type PushSenderRef = Arc<dyn PushSender>;

pub fn build_push_sender(config: &PushConfig) -> Result<PushSenderRef> {
    match config.provider {
        PushProviderKind::Fcm => {
            let sender =
                FcmPushSender::from_config(config).context("failed to build FCM push sender")?;
            info!("push provider: fcm");
            Ok(Arc::new(sender))
        }
        PushProviderKind::Noop => {
            info!("push provider: noop");
            Ok(NoopPushSender::shared())
        }
    }
}
