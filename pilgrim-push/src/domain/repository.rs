use async_trait::async_trait;
use pilgrim_core::error::Result;

use super::model::PushPayload;

/// 推送渠道端口：每次只向一个设备 token 投递
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_one(&self, token: &str, payload: &PushPayload) -> Result<()>;
}
