//! 通话历史查询

use std::sync::Arc;

use pilgrim_core::error::Result;
use tracing::{debug, instrument};

use crate::domain::model::CallRecord;
use crate::domain::repository::CallRecordRepository;
use crate::domain::value_object::UserId;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// 通话历史查询服务
#[derive(Clone)]
pub struct CallHistoryService {
    calls: Arc<dyn CallRecordRepository>,
}

impl CallHistoryService {
    pub fn new(calls: Arc<dyn CallRecordRepository>) -> Self {
        Self { calls }
    }

    /// 用户作为主叫或被叫的通话，最新在前
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn history_for(&self, user_id: &UserId, limit: Option<usize>) -> Result<Vec<CallRecord>> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_HISTORY_LIMIT);
        let records = self.calls.list_for_user(user_id, limit).await?;
        debug!(count = records.len(), limit, "call history loaded");
        Ok(records)
    }

    pub async fn unread_missed_count(&self, user_id: &UserId) -> Result<u64> {
        self.calls.count_unread_missed(user_id).await
    }

    /// 标记已读，返回变更条数
    pub async fn mark_missed_read(&self, user_id: &UserId) -> Result<u64> {
        let changed = self.calls.mark_missed_read(user_id).await?;
        debug!(user_id = %user_id, changed, "missed calls marked read");
        Ok(changed)
    }
}
