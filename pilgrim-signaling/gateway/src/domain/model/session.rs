//! 连接会话
//!
//! 由一条传输连接独占，随连接建立而创建、随断开整体销毁，不做持久化。

use crate::domain::value_object::{CallId, ConnectionId, GroupId, Role, UserId};

/// 工作人员发布的导航信标
#[derive(Debug, Clone, PartialEq)]
pub struct NavBeacon {
    pub group_id: GroupId,
    pub lat: f64,
    pub lng: f64,
    pub broadcaster_id: Option<String>,
    pub broadcaster_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub connection_id: ConnectionId,
    /// 注册前为空，注册后不再改变
    pub user_id: Option<UserId>,
    pub role: Role,
    /// 最近一次加入的群组，断开时用于广播离线
    pub current_group_id: Option<GroupId>,
    pub active_call_id: Option<CallId>,
    /// 每条连接最多一个信标
    pub nav_beacon: Option<NavBeacon>,
}

impl Session {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            user_id: None,
            role: Role::default(),
            current_group_id: None,
            active_call_id: None,
            nav_beacon: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.user_id.is_some()
    }

    /// 清除指定通话（仅当会话当前持有的就是该通话）
    pub fn release_call(&mut self, call_id: &CallId) -> bool {
        if self.active_call_id.as_ref() == Some(call_id) {
            self.active_call_id = None;
            true
        } else {
            false
        }
    }
}
