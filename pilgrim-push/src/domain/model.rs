//! 推送领域模型

use std::collections::BTreeMap;

/// 来电通知的 data.type
pub const TYPE_INCOMING_CALL: &str = "incoming_call";
/// 语音播报消息的 data.messageType
pub const MESSAGE_TYPE_TTS: &str = "tts";

/// 调用方提交的一条通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    /// 透传给客户端的数据，FCM 要求值为字符串
    pub data: BTreeMap<String, String>,
    pub urgent: bool,
}

impl PushNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
            urgent: false,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    fn data_value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// 是否必须以纯数据载荷发送
    ///
    /// 可见通知块会阻止部分平台唤起后台任务，来电与紧急语音播报只能走纯数据。
    pub fn requires_data_only(&self) -> bool {
        self.data_value("type") == Some(TYPE_INCOMING_CALL)
            || (self.urgent && self.data_value("messageType") == Some(MESSAGE_TYPE_TTS))
    }
}

/// 载荷类型（用于日志与指标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    DataOnly,
    Visible,
}

impl PushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::DataOnly => "data_only",
            PushKind::Visible => "visible",
        }
    }
}

/// 发往单个 token 的载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPayload {
    /// 无通知块，由客户端后台任务自行渲染
    DataOnly { data: BTreeMap<String, String> },
    /// 可见通知，urgent 决定通道与提示音
    Visible {
        title: String,
        body: String,
        data: BTreeMap<String, String>,
        urgent: bool,
    },
}

impl PushPayload {
    /// 根据通知内容选择载荷形态
    ///
    /// data 中原有的 `type` 保持不变，投递优先级另存于 `priority`。
    pub fn from_notification(notification: &PushNotification) -> Self {
        let mut data = notification.data.clone();
        data.insert(
            "priority".to_string(),
            if notification.urgent { "urgent" } else { "normal" }.to_string(),
        );

        if notification.requires_data_only() {
            PushPayload::DataOnly { data }
        } else {
            PushPayload::Visible {
                title: notification.title.clone(),
                body: notification.body.clone(),
                data,
                urgent: notification.urgent,
            }
        }
    }

    pub fn kind(&self) -> PushKind {
        match self {
            PushPayload::DataOnly { .. } => PushKind::DataOnly,
            PushPayload::Visible { .. } => PushKind::Visible,
        }
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        match self {
            PushPayload::DataOnly { data } | PushPayload::Visible { data, .. } => data,
        }
    }
}

/// 一次分发的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub success_count: usize,
    pub failed_tokens: Vec<String>,
}

impl PushReport {
    pub fn attempted(&self) -> usize {
        self.success_count + self.failed_tokens.len()
    }

    pub fn all_failed(&self) -> bool {
        self.success_count == 0 && !self.failed_tokens.is_empty()
    }
}
