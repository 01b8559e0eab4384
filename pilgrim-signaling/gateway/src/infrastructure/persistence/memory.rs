use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pilgrim_core::error::{ErrorCode, PilgrimError, Result};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::model::{AccountRecord, CallRecord, CallStatus, CallTransition};
use crate::domain::repository::{AccountStore, CallRecordRepository};
use crate::domain::value_object::{CallId, UserId};

/// 内存版账户存储，实现用于开发和单测阶段
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<UserId, AccountRecord>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: UserId, account: AccountRecord) {
        self.accounts.write().await.insert(user_id, account);
    }

    pub async fn account(&self, user_id: &UserId) -> Option<AccountRecord> {
        self.accounts.read().await.get(user_id).cloned()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_account(&self, user_id: &UserId) -> Result<Option<AccountRecord>> {
        Ok(self.accounts.read().await.get(user_id).cloned())
    }

    async fn set_presence(
        &self,
        user_id: &UserId,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(user_id) {
            Some(account) => {
                account.is_online = online;
                account.last_active_at = Some(at);
            }
            None => debug!(user_id = %user_id, "presence update for unknown account ignored"),
        }
        Ok(())
    }
}

/// 内存版通话记录存储
#[derive(Default)]
pub struct InMemoryCallRecordRepository {
    records: Arc<RwLock<HashMap<CallId, CallRecord>>>,
}

impl InMemoryCallRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

fn unread_missed(record: &CallRecord, user_id: &UserId) -> bool {
    &record.receiver_id == user_id && record.status == CallStatus::Missed && !record.is_read
}

#[async_trait]
impl CallRecordRepository for InMemoryCallRecordRepository {
    async fn create(
        &self,
        caller_id: &UserId,
        receiver_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<CallId> {
        let id = CallId::generate();
        let record = CallRecord::ringing(id.clone(), caller_id.clone(), receiver_id.clone(), at);
        self.records.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<CallRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| {
            PilgrimError::new(ErrorCode::NotFound, format!("call record {id} not found"))
        })?;
        record.apply(&transition)?;
        Ok(record.clone())
    }

    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<CallRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<CallRecord> = records
            .values()
            .filter(|r| r.involves(user_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn count_unread_missed(&self, user_id: &UserId) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| unread_missed(r, user_id)).count() as u64)
    }

    async fn mark_missed_read(&self, user_id: &UserId) -> Result<u64> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.values_mut().filter(|r| unread_missed(r, user_id)) {
            record.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }
}
