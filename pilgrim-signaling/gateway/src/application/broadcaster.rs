//! 供其他子系统使用的广播句柄
//!
//! REST 侧的 SOS 触发、消息发送等通过它向同一注册表中的房间投递事件。

use std::sync::Arc;

use tracing::debug;

use crate::domain::event::OutboundEvent;
use crate::domain::value_object::{GroupId, RoomKey, UserId};
use crate::infrastructure::RoomRegistry;

#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: Arc<RoomRegistry>,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// 向群组房间全体投递，返回投递的连接数
    pub async fn emit_to_group(&self, group_id: &GroupId, event: OutboundEvent) -> usize {
        let name = event.name();
        let delivered = self
            .registry
            .broadcast_to_room(&RoomKey::Group(group_id.clone()), event, None)
            .await;
        debug!(group_id = %group_id, event = name, delivered, "external group emit");
        delivered
    }

    pub async fn emit_to_user(&self, user_id: &UserId, event: OutboundEvent) -> usize {
        let name = event.name();
        let delivered = self.registry.send_to_user(user_id, event).await;
        debug!(user_id = %user_id, event = name, delivered, "external user emit");
        delivered
    }
}
