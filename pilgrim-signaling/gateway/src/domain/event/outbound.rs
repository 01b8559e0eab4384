//! 服务端 → 客户端事件

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "status_update")]
    StatusUpdate(StatusUpdate),
    #[serde(rename = "location_update")]
    LocationUpdate(Map<String, Value>),
    #[serde(rename = "battery-update")]
    BatteryUpdate(BatteryUpdate),
    #[serde(rename = "sos-alert-received")]
    SosAlertReceived(Map<String, Value>),
    #[serde(rename = "sos-alert-cancelled")]
    SosAlertCancelled(Map<String, Value>),
    #[serde(rename = "mod_nav_beacon")]
    NavBeacon(NavBeaconNotice),
    #[serde(rename = "call-offer")]
    CallOffer(CallOfferNotice),
    #[serde(rename = "call-answer")]
    CallAnswer(CallAnswerNotice),
    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidateNotice),
    #[serde(rename = "call-declined")]
    CallDeclined(PeerNotice),
    #[serde(rename = "call-cancel")]
    CallCancel(PeerNotice),
    #[serde(rename = "call-busy")]
    CallBusy(PeerNotice),
    #[serde(rename = "call-end")]
    CallEnd(PeerNotice),
    #[serde(rename = "missed-call-received")]
    MissedCallReceived(MissedCallNotice),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::StatusUpdate(_) => "status_update",
            OutboundEvent::LocationUpdate(_) => "location_update",
            OutboundEvent::BatteryUpdate(_) => "battery-update",
            OutboundEvent::SosAlertReceived(_) => "sos-alert-received",
            OutboundEvent::SosAlertCancelled(_) => "sos-alert-cancelled",
            OutboundEvent::NavBeacon(_) => "mod_nav_beacon",
            OutboundEvent::CallOffer(_) => "call-offer",
            OutboundEvent::CallAnswer(_) => "call-answer",
            OutboundEvent::IceCandidate(_) => "ice-candidate",
            OutboundEvent::CallDeclined(_) => "call-declined",
            OutboundEvent::CallCancel(_) => "call-cancel",
            OutboundEvent::CallBusy(_) => "call-busy",
            OutboundEvent::CallEnd(_) => "call-end",
            OutboundEvent::MissedCallReceived(_) => "missed-call-received",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn peer(from: &impl ToString) -> PeerNotice {
        PeerNotice {
            from: from.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    #[serde(rename = "pilgrimId")]
    pub pilgrim_id: String,
    pub active: bool,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryUpdate {
    pub battery_percent: Value,
    #[serde(rename = "pilgrimId")]
    pub pilgrim_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavBeaconNotice {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(rename = "moderatorId", skip_serializing_if = "Option::is_none")]
    pub moderator_id: Option<String>,
    #[serde(rename = "moderatorName", skip_serializing_if = "Option::is_none")]
    pub moderator_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallerInfo {
    pub id: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallOfferNotice {
    #[serde(rename = "channelName", skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    pub from: String,
    #[serde(rename = "callerInfo")]
    pub caller_info: CallerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallAnswerNotice {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IceCandidateNotice {
    pub candidate: Value,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerNotice {
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedCallNotice {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "callerId")]
    pub caller_id: String,
    #[serde(rename = "callerName")]
    pub caller_name: String,
}
