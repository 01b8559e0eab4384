//! 通话结束时的结果判定

use chrono::{DateTime, Utc};
use pilgrim_core::utils::elapsed_whole_seconds;

use crate::domain::model::{CallRecord, CallStatus, CallTransition};

/// 根据记录当前状态判定 `call-end` 的结果
///
/// 仍在响铃判为未接（时长 0），已接通判为完成（时长按接通时间取整秒）。
/// 记录已是终态时返回 `None`。
pub fn classify_call_end(record: &CallRecord, ended_at: DateTime<Utc>) -> Option<CallTransition> {
    match record.status {
        CallStatus::Ringing => Some(CallTransition::concluded(
            CallStatus::Missed,
            ended_at,
            0,
        )),
        CallStatus::InProgress => {
            let duration = record
                .started_at
                .map(|started_at| elapsed_whole_seconds(started_at, ended_at))
                .unwrap_or(0);
            Some(CallTransition::concluded(
                CallStatus::Completed,
                ended_at,
                duration,
            ))
        }
        CallStatus::Completed | CallStatus::Declined | CallStatus::Missed => None,
    }
}
