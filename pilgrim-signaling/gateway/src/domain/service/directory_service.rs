//! 目录服务：跨两个账户存储查询用户

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pilgrim_core::error::Result;
use tracing::warn;

use crate::domain::model::DirectoryEntry;
use crate::domain::repository::AccountStore;
use crate::domain::value_object::{Role, UserId};

pub struct DirectoryService {
    staff: Arc<dyn AccountStore>,
    pilgrims: Arc<dyn AccountStore>,
}

impl DirectoryService {
    pub fn new(staff: Arc<dyn AccountStore>, pilgrims: Arc<dyn AccountStore>) -> Self {
        Self { staff, pilgrims }
    }

    fn store_for(&self, role: Role) -> &Arc<dyn AccountStore> {
        match role {
            Role::Pilgrim => &self.pilgrims,
            Role::Staff => &self.staff,
        }
    }

    /// 先查工作人员存储，未命中再查朝圣者存储
    pub async fn lookup(&self, user_id: &UserId) -> Result<Option<DirectoryEntry>> {
        for class in [Role::Staff, Role::Pilgrim] {
            if let Some(account) = self.store_for(class).find_account(user_id).await? {
                return Ok(Some(DirectoryEntry::from_account(
                    user_id.clone(),
                    class,
                    account,
                )));
            }
        }
        Ok(None)
    }

    /// 查询失败视为不可达
    pub async fn lookup_or_none(&self, user_id: &UserId) -> Option<DirectoryEntry> {
        match self.lookup(user_id).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "directory lookup failed, treating as unreachable");
                None
            }
        }
    }

    /// 按注册角色写入对应存储的在线状态
    pub async fn set_presence(
        &self,
        user_id: &UserId,
        role: Role,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.store_for(role).set_presence(user_id, online, at).await
    }
}
