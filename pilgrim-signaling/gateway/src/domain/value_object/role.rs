use std::fmt;

/// 连接注册时声明的账户类别，决定在线状态写入哪个账户存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Pilgrim,
    /// 管理员、协调员等工作人员
    Staff,
}

impl Role {
    /// 未声明时按朝圣者处理，其余取值一律归为工作人员
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Role::Pilgrim,
            Some(value) if value.eq_ignore_ascii_case("pilgrim") => Role::Pilgrim,
            Some(_) => Role::Staff,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pilgrim => "pilgrim",
            Role::Staff => "staff",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
