//! 客户端 → 服务端事件
//!
//! 帧格式 `{"event": "<name>", "data": {...}}`。字段缺失不会导致解析失败，
//! 由处理器按需忽略。

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::value_object::{GroupId, UserId};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "register-user")]
    RegisterUser(RegisterUserRequest),
    #[serde(rename = "join_group")]
    JoinGroup(GroupRef),
    #[serde(rename = "leave_group")]
    LeaveGroup(GroupRef),
    #[serde(rename = "update_location")]
    UpdateLocation(RelayPayload),
    #[serde(rename = "sos_alert")]
    SosAlert(RelayPayload),
    #[serde(rename = "sos_cancel")]
    SosCancel(RelayPayload),
    #[serde(rename = "mod_nav_beacon")]
    NavBeacon(NavBeaconRequest),
    #[serde(rename = "call-offer")]
    CallOffer(CallOfferRequest),
    #[serde(rename = "call-answer")]
    CallAnswer(CallAnswerRequest),
    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidateRequest),
    #[serde(rename = "call-declined")]
    CallDeclined(PeerRequest),
    #[serde(rename = "call-cancel")]
    CallCancel(PeerRequest),
    #[serde(rename = "call-busy")]
    CallBusy(PeerRequest),
    #[serde(rename = "call-end")]
    CallEnd(PeerRequest),
}

impl InboundEvent {
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::RegisterUser(_) => "register-user",
            InboundEvent::JoinGroup(_) => "join_group",
            InboundEvent::LeaveGroup(_) => "leave_group",
            InboundEvent::UpdateLocation(_) => "update_location",
            InboundEvent::SosAlert(_) => "sos_alert",
            InboundEvent::SosCancel(_) => "sos_cancel",
            InboundEvent::NavBeacon(_) => "mod_nav_beacon",
            InboundEvent::CallOffer(_) => "call-offer",
            InboundEvent::CallAnswer(_) => "call-answer",
            InboundEvent::IceCandidate(_) => "ice-candidate",
            InboundEvent::CallDeclined(_) => "call-declined",
            InboundEvent::CallCancel(_) => "call-cancel",
            InboundEvent::CallBusy(_) => "call-busy",
            InboundEvent::CallEnd(_) => "call-end",
        }
    }
}

fn user_id_of(value: &Option<Value>) -> Option<UserId> {
    value.as_ref().and_then(UserId::from_value)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterUserRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub role: Option<String>,
}

impl RegisterUserRequest {
    pub fn user_id(&self) -> Option<UserId> {
        user_id_of(&self.user_id)
    }
}

/// 群组引用：`{"groupId": "G1"}` 或直接传 `"G1"`
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct GroupRef(pub Value);

impl GroupRef {
    pub fn group_id(&self) -> Option<GroupId> {
        match &self.0 {
            Value::Object(map) => map.get("groupId").and_then(GroupId::from_value),
            other => GroupId::from_value(other),
        }
    }
}

/// 原样转发的载荷（位置、SOS）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RelayPayload(pub Map<String, Value>);

impl RelayPayload {
    pub fn group_id(&self) -> Option<GroupId> {
        self.0.get("groupId").and_then(GroupId::from_value)
    }

    /// 载荷声明的主体（朝圣者）
    pub fn subject_id(&self) -> Option<UserId> {
        self.0.get("pilgrimId").and_then(UserId::from_value)
    }

    pub fn battery_percent(&self) -> Option<Value> {
        self.0
            .get("battery_percent")
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavBeaconRequest {
    #[serde(rename = "groupId", default)]
    pub group_id: Option<Value>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(rename = "moderatorId", default)]
    pub moderator_id: Option<Value>,
    #[serde(rename = "moderatorName", default)]
    pub moderator_name: Option<String>,
}

impl NavBeaconRequest {
    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id.as_ref().and_then(GroupId::from_value)
    }

    pub fn moderator_id(&self) -> Option<String> {
        self.moderator_id
            .as_ref()
            .and_then(crate::domain::value_object::ids::identity_from_value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallOfferRequest {
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(rename = "channelName", default)]
    pub channel_name: Option<String>,
    /// SDP offer，原样透传
    #[serde(default)]
    pub offer: Option<Value>,
}

impl CallOfferRequest {
    pub fn target(&self) -> Option<UserId> {
        user_id_of(&self.to)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallAnswerRequest {
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub answer: Option<Value>,
}

impl CallAnswerRequest {
    pub fn target(&self) -> Option<UserId> {
        user_id_of(&self.to)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IceCandidateRequest {
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub candidate: Option<Value>,
}

impl IceCandidateRequest {
    pub fn target(&self) -> Option<UserId> {
        user_id_of(&self.to)
    }
}

/// 仅携带对端标识的信令
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerRequest {
    #[serde(default)]
    pub to: Option<Value>,
}

impl PeerRequest {
    pub fn target(&self) -> Option<UserId> {
        user_id_of(&self.to)
    }
}
