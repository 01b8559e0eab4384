use chrono::{DateTime, Utc};

use crate::domain::value_object::{Role, UserId};

/// 账户存储中的一条账户（工作人员或朝圣者）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountRecord {
    pub full_name: Option<String>,
    /// 存储中的原始角色，如 `moderator`、`admin`、`pilgrim`
    pub role: Option<String>,
    pub push_token: Option<String>,
    pub is_online: bool,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// 目录查询结果
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
    /// 命中的账户存储
    pub account_class: Role,
    pub push_token: Option<String>,
}

impl DirectoryEntry {
    pub fn from_account(user_id: UserId, account_class: Role, account: AccountRecord) -> Self {
        Self {
            user_id,
            display_name: account
                .full_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            role: account
                .role
                .unwrap_or_else(|| account_class.as_str().to_string()),
            account_class,
            push_token: account.push_token.filter(|t| !t.trim().is_empty()),
        }
    }
}
