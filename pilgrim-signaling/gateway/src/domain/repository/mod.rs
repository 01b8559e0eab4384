//! 仓储端口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pilgrim_core::error::Result;

use crate::domain::model::{AccountRecord, CallRecord, CallTransition};
use crate::domain::value_object::{CallId, UserId};

/// 账户存储（工作人员与朝圣者各一个实例）
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, user_id: &UserId) -> Result<Option<AccountRecord>>;

    /// 写入在线标记与最后活跃时间；账户不存在时不做任何修改
    async fn set_presence(&self, user_id: &UserId, online: bool, at: DateTime<Utc>)
    -> Result<()>;
}

/// 通话记录存储
#[async_trait]
pub trait CallRecordRepository: Send + Sync {
    /// 以 `ringing` 状态追加一条记录
    async fn create(
        &self,
        caller_id: &UserId,
        receiver_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<CallId>;

    /// 迁移状态，状态机之外的迁移返回 `InvalidStateTransition`
    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<CallRecord>;

    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>>;

    /// 用户作为主叫或被叫的记录，按创建时间倒序
    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<CallRecord>>;

    async fn count_unread_missed(&self, user_id: &UserId) -> Result<u64>;

    async fn mark_missed_read(&self, user_id: &UserId) -> Result<u64>;
}
