use std::sync::Arc;

use async_trait::async_trait;
use pilgrim_core::error::Result;
use tracing::info;

use crate::domain::model::PushPayload;
use crate::domain::repository::PushSender;

pub struct NoopPushSender;

#[async_trait]
impl PushSender for NoopPushSender {
    async fn send_one(&self, token: &str, payload: &PushPayload) -> Result<()> {
        info!(token = %token, kind = payload.kind().as_str(), "noop push sender invoked");
        Ok(())
    }
}

impl NoopPushSender {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self)
    }
}
