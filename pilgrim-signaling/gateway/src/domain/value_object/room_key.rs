use std::fmt;

use super::ids::{GroupId, UserId};

/// 广播范围
///
/// 每个已注册用户有一个个人房间，用于定向投递与在线判断。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::User(id) => write!(f, "user_{id}"),
            RoomKey::Group(id) => write!(f, "group_{id}"),
        }
    }
}
