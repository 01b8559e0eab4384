//! 通话记录与状态机
//!
//! `ringing → {in-progress → completed} | declined | missed`

use std::fmt;

use chrono::{DateTime, Utc};
use pilgrim_core::error::{ErrorBuilder, ErrorCode, Result};
use serde::{Deserialize, Serialize};

use crate::domain::value_object::{CallId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Ringing,
    InProgress,
    Completed,
    Declined,
    Missed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Declined => "declined",
            CallStatus::Missed => "missed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "declined" => Some(CallStatus::Declined),
            "missed" => Some(CallStatus::Missed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Declined | CallStatus::Missed
        )
    }

    /// 允许迁移到 `self` 的前置状态
    pub fn predecessors(&self) -> &'static [CallStatus] {
        match self {
            CallStatus::Ringing => &[],
            CallStatus::InProgress => &[CallStatus::Ringing],
            CallStatus::Completed => &[CallStatus::InProgress],
            CallStatus::Declined | CallStatus::Missed => &[CallStatus::Ringing],
        }
    }

    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Internet,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Internet => "internet",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 秒，未接通为 0
    pub duration: u64,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn ringing(
        id: CallId,
        caller_id: UserId,
        receiver_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            caller_id,
            receiver_id,
            call_type: CallType::Internet,
            status: CallStatus::Ringing,
            started_at: None,
            ended_at: None,
            duration: 0,
            is_read: false,
            created_at,
        }
    }

    pub fn involves(&self, user_id: &UserId) -> bool {
        &self.caller_id == user_id || &self.receiver_id == user_id
    }

    /// 通话另一方；`user_id` 不是主叫时返回主叫
    pub fn counterpart_of(&self, user_id: &UserId) -> &UserId {
        if &self.caller_id == user_id {
            &self.receiver_id
        } else {
            &self.caller_id
        }
    }

    /// 应用一次状态迁移，拒绝状态机之外的迁移
    pub fn apply(&mut self, transition: &CallTransition) -> Result<()> {
        if !self.status.can_transition_to(transition.status) {
            return Err(ErrorBuilder::new(
                ErrorCode::InvalidStateTransition,
                "call record transition rejected",
            )
            .details(format!(
                "{}: {} -> {}",
                self.id, self.status, transition.status
            ))
            .build_error());
        }

        self.status = transition.status;
        if let Some(started_at) = transition.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(ended_at) = transition.ended_at {
            self.ended_at = Some(ended_at);
        }
        if let Some(duration) = transition.duration {
            self.duration = duration;
        }
        Ok(())
    }
}

/// 状态迁移及其附带字段
#[derive(Debug, Clone, PartialEq)]
pub struct CallTransition {
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

impl CallTransition {
    pub fn answered(at: DateTime<Utc>) -> Self {
        Self {
            status: CallStatus::InProgress,
            started_at: Some(at),
            ended_at: None,
            duration: None,
        }
    }

    pub fn declined(at: DateTime<Utc>) -> Self {
        Self {
            status: CallStatus::Declined,
            started_at: None,
            ended_at: Some(at),
            duration: None,
        }
    }

    pub fn concluded(status: CallStatus, ended_at: DateTime<Utc>, duration: u64) -> Self {
        Self {
            status,
            started_at: None,
            ended_at: Some(ended_at),
            duration: Some(duration),
        }
    }
}
