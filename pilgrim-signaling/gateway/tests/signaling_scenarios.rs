// 集成测试 - 以内存存储驱动会话协调器，覆盖在线、信标与通话信令流程
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pilgrim_core::metrics::{PushMetrics, SignalingGatewayMetrics};
use pilgrim_core::utils::ManualClock;
use pilgrim_push::{PushDispatcher, PushKind, PushPayload, PushSender};
use pilgrim_signaling_gateway::application::{
    CallHistoryService, RoomBroadcaster, SessionCoordinator,
};
use pilgrim_signaling_gateway::domain::event::{
    BatteryUpdate, CallAnswerNotice, InboundEvent, MissedCallNotice, NavBeaconNotice, OutboundEvent,
    PeerNotice, StatusUpdate,
};
use pilgrim_signaling_gateway::domain::model::{AccountRecord, CallRecord, CallStatus};
use pilgrim_signaling_gateway::domain::value_object::{ConnectionId, GroupId, UserId};
use pilgrim_signaling_gateway::infrastructure::RoomRegistry;
use pilgrim_signaling_gateway::infrastructure::persistence::{
    InMemoryAccountStore, InMemoryCallRecordRepository,
};
use pilgrim_signaling_gateway::domain::service::DirectoryService;
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_test::assert_ok;

const P1_TOKEN: &str = "fcm-token-p1";

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, PushPayload)>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(String, PushPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send_one(&self, token: &str, payload: &PushPayload) -> pilgrim_core::error::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), payload.clone()));
        Ok(())
    }
}

struct Client {
    id: ConnectionId,
    rx: UnboundedReceiver<OutboundEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

struct Harness {
    coordinator: SessionCoordinator,
    registry: Arc<RoomRegistry>,
    staff: Arc<InMemoryAccountStore>,
    pilgrims: Arc<InMemoryAccountStore>,
    calls: Arc<InMemoryCallRecordRepository>,
    push: Arc<RecordingSender>,
    clock: ManualClock,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 14, 8, 0, 0).unwrap()
}

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

impl Harness {
    async fn new(p1_has_token: bool) -> Self {
        Self::with_ring_timeout(p1_has_token, None).await
    }

    async fn with_ring_timeout(p1_has_token: bool, ring_timeout: Option<StdDuration>) -> Self {
        pilgrim_core::tracing::init_tracing_from_config(None);

        let staff = Arc::new(InMemoryAccountStore::new());
        let pilgrims = Arc::new(InMemoryAccountStore::new());
        staff
            .insert(
                uid("M1"),
                AccountRecord {
                    full_name: Some("Yusuf".into()),
                    role: Some("moderator".into()),
                    ..Default::default()
                },
            )
            .await;
        staff
            .insert(
                uid("M2"),
                AccountRecord {
                    full_name: Some("Khalid".into()),
                    role: Some("moderator".into()),
                    ..Default::default()
                },
            )
            .await;
        pilgrims
            .insert(
                uid("P1"),
                AccountRecord {
                    full_name: Some("Amina".into()),
                    role: Some("pilgrim".into()),
                    push_token: p1_has_token.then(|| P1_TOKEN.to_string()),
                    ..Default::default()
                },
            )
            .await;

        let calls = Arc::new(InMemoryCallRecordRepository::new());
        let push = Arc::new(RecordingSender::default());
        let clock = ManualClock::new(t0());
        let registry = Arc::new(RoomRegistry::new());

        let coordinator = SessionCoordinator::new(
            registry.clone(),
            Arc::new(DirectoryService::new(staff.clone(), pilgrims.clone())),
            calls.clone(),
            PushDispatcher::new(push.clone(), Arc::new(PushMetrics::new())),
            Arc::new(SignalingGatewayMetrics::new()),
            Arc::new(clock.clone()),
        )
        .with_ring_timeout(ring_timeout);

        Self {
            coordinator,
            registry,
            staff,
            pilgrims,
            calls,
            push,
            clock,
        }
    }

    async fn connect(&self) -> Client {
        let (tx, rx) = unbounded_channel();
        let id = self.coordinator.connect(tx).await;
        Client { id, rx }
    }

    async fn send(&self, client: &Client, frame: Value) {
        let event = InboundEvent::from_frame(&frame.to_string()).unwrap();
        self.coordinator.handle(client.id, event).await;
    }

    async fn register(&self, client: &Client, user_id: &str, role: &str) {
        self.send(
            client,
            json!({"event": "register-user", "data": {"userId": user_id, "role": role}}),
        )
        .await;
    }

    async fn only_record(&self) -> CallRecord {
        let records = self.calls.all().await;
        assert_eq!(records.len(), 1, "expected exactly one call record");
        records.into_iter().next().unwrap()
    }

    async fn active_call(&self, client: &Client) -> Option<String> {
        self.registry
            .session(client.id)
            .await
            .and_then(|s| s.active_call_id)
            .map(|id| id.to_string())
    }
}

/// 主叫 M1（工作人员）与被叫 P1（朝圣者）均在线
async fn connected_pair(harness: &Harness) -> (Client, Client) {
    let mut x = harness.connect().await;
    let mut y = harness.connect().await;
    harness.register(&x, "M1", "moderator").await;
    harness.register(&y, "P1", "pilgrim").await;
    x.drain();
    y.drain();
    (x, y)
}

#[tokio::test]
async fn test_presence_follows_register_and_disconnect() -> Result<()> {
    let harness = Harness::new(true).await;
    let client = harness.connect().await;

    harness.register(&client, "P1", "pilgrim").await;
    let account = harness.pilgrims.account(&uid("P1")).await.unwrap();
    assert!(account.is_online);
    assert_eq!(account.last_active_at, Some(t0()));

    harness.clock.advance(Duration::seconds(10));
    harness.coordinator.disconnect(client.id).await;

    let account = harness.pilgrims.account(&uid("P1")).await.unwrap();
    assert!(!account.is_online);
    assert_eq!(account.last_active_at, Some(t0() + Duration::seconds(10)));
    assert!(!harness.registry.is_user_reachable(&uid("P1")).await);
    Ok(())
}

#[tokio::test]
async fn test_staff_presence_is_written_to_staff_store() -> Result<()> {
    let harness = Harness::new(false).await;
    let client = harness.connect().await;
    harness.register(&client, "M1", "admin").await;

    assert!(harness.staff.account(&uid("M1")).await.unwrap().is_online);
    harness.coordinator.disconnect(client.id).await;
    assert!(!harness.staff.account(&uid("M1")).await.unwrap().is_online);
    Ok(())
}

#[tokio::test]
async fn test_register_as_other_user_is_rejected() -> Result<()> {
    let harness = Harness::new(false).await;
    let client = harness.connect().await;
    harness.register(&client, "M1", "moderator").await;
    harness.register(&client, "P1", "pilgrim").await;

    let session = harness.registry.session(client.id).await.unwrap();
    assert_eq!(session.user_id, Some(uid("M1")));
    assert!(!harness.registry.is_user_reachable(&uid("P1")).await);
    assert!(!harness.pilgrims.account(&uid("P1")).await.unwrap().is_online);
    Ok(())
}

#[tokio::test]
async fn test_joining_group_twice_delivers_once() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut a = harness.connect().await;
    let b = harness.connect().await;

    for client in [&a, &a, &b] {
        harness
            .send(client, json!({"event": "join_group", "data": {"groupId": "G1"}}))
            .await;
    }
    a.drain();

    harness
        .send(
            &b,
            json!({"event": "update_location", "data": {"groupId": "G1", "lat": 21.42, "lng": 39.82}}),
        )
        .await;
    assert_eq!(a.drain().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_join_group_announces_registered_user() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut watcher = harness.connect().await;
    harness
        .send(&watcher, json!({"event": "join_group", "data": "G1"}))
        .await;

    let pilgrim = harness.connect().await;
    harness.register(&pilgrim, "P1", "pilgrim").await;
    harness
        .send(&pilgrim, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;

    assert_eq!(
        watcher.drain(),
        vec![OutboundEvent::StatusUpdate(StatusUpdate {
            pilgrim_id: "P1".into(),
            active: true,
            last_active_at: t0(),
        })]
    );
    Ok(())
}

#[tokio::test]
async fn test_location_relay_excludes_sender_and_targets_battery() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut moderator = harness.connect().await;
    let mut pilgrim = harness.connect().await;
    harness.register(&pilgrim, "P1", "pilgrim").await;
    for client in [&moderator, &pilgrim] {
        harness
            .send(client, json!({"event": "join_group", "data": {"groupId": "G1"}}))
            .await;
    }
    moderator.drain();
    pilgrim.drain();

    harness
        .send(
            &moderator,
            json!({"event": "update_location", "data": {
                "groupId": "G1", "pilgrimId": "P1", "lat": 21.42, "lng": 39.82, "battery_percent": 64
            }}),
        )
        .await;

    assert!(moderator.drain().is_empty());
    let events = pilgrim.drain();
    assert_eq!(events.len(), 2);
    match &events[0] {
        OutboundEvent::LocationUpdate(payload) => assert_eq!(payload["lat"], json!(21.42)),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        events[1],
        OutboundEvent::BatteryUpdate(BatteryUpdate {
            battery_percent: json!(64),
            pilgrim_id: "P1".into(),
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_sos_reaches_whole_room_including_sender() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut pilgrim = harness.connect().await;
    let mut moderator = harness.connect().await;
    for client in [&pilgrim, &moderator] {
        harness
            .send(client, json!({"event": "join_group", "data": {"groupId": "G1"}}))
            .await;
    }

    harness
        .send(
            &pilgrim,
            json!({"event": "sos_alert", "data": {"groupId": "G1", "pilgrimId": "P1", "message": "help"}}),
        )
        .await;
    harness
        .send(
            &pilgrim,
            json!({"event": "sos_cancel", "data": {"groupId": "G1", "pilgrimId": "P1"}}),
        )
        .await;

    for client in [&mut pilgrim, &mut moderator] {
        let names: Vec<&str> = client.drain().iter().map(OutboundEvent::name).collect();
        assert_eq!(names, vec!["sos-alert-received", "sos-alert-cancelled"]);
    }
    Ok(())
}

/// 信标启用后加入的连接立即收到补发
#[tokio::test]
async fn test_nav_beacon_replayed_to_late_joiner() -> Result<()> {
    let harness = Harness::new(false).await;
    let moderator = harness.connect().await;
    harness.register(&moderator, "M1", "moderator").await;
    harness
        .send(&moderator, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;
    harness
        .send(
            &moderator,
            json!({"event": "mod_nav_beacon", "data": {
                "groupId": "G1", "enabled": true, "lat": 21.4225, "lng": 39.8262,
                "moderatorId": "M1", "moderatorName": "Yusuf"
            }}),
        )
        .await;

    let mut late = harness.connect().await;
    harness
        .send(&late, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;

    let events = late.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::NavBeacon(notice) => {
            assert!(notice.enabled);
            assert_eq!(notice.group_id, "G1");
            assert_eq!(notice.lat, Some(21.4225));
            assert_eq!(notice.lng, Some(39.8262));
            assert_eq!(notice.moderator_name.as_deref(), Some("Yusuf"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_disabled_beacon_is_not_replayed() -> Result<()> {
    let harness = Harness::new(false).await;
    let moderator = harness.connect().await;
    harness
        .send(&moderator, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;
    for enabled in [true, false] {
        harness
            .send(
                &moderator,
                json!({"event": "mod_nav_beacon", "data": {
                    "groupId": "G1", "enabled": enabled, "lat": 21.4, "lng": 39.8
                }}),
            )
            .await;
    }

    let mut late = harness.connect().await;
    harness
        .send(&late, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;
    assert!(late.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_beacon_publish_and_retract_reach_group_members() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut member = harness.connect().await;
    let mut moderator = harness.connect().await;
    for client in [&member, &moderator] {
        harness
            .send(client, json!({"event": "join_group", "data": {"groupId": "G1"}}))
            .await;
    }
    member.drain();

    for enabled in [true, false] {
        harness
            .send(
                &moderator,
                json!({"event": "mod_nav_beacon", "data": {
                    "groupId": "G1", "enabled": enabled, "lat": 21.4, "lng": 39.8,
                    "moderatorId": "M1"
                }}),
            )
            .await;
    }

    let events = member.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        OutboundEvent::NavBeacon(NavBeaconNotice {
            group_id: "G1".into(),
            enabled: false,
            lat: None,
            lng: None,
            moderator_id: Some("M1".into()),
            moderator_name: None,
        })
    );
    assert!(moderator.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_retracts_beacon_then_announces_offline() -> Result<()> {
    let harness = Harness::new(false).await;
    let moderator = harness.connect().await;
    let mut pilgrim = harness.connect().await;
    harness.register(&moderator, "M1", "moderator").await;
    for client in [&moderator, &pilgrim] {
        harness
            .send(client, json!({"event": "join_group", "data": {"groupId": "G1"}}))
            .await;
    }
    harness
        .send(
            &moderator,
            json!({"event": "mod_nav_beacon", "data": {
                "groupId": "G1", "enabled": true, "lat": 21.4, "lng": 39.8, "moderatorId": "M1"
            }}),
        )
        .await;
    pilgrim.drain();

    harness.clock.advance(Duration::seconds(5));
    harness.coordinator.disconnect(moderator.id).await;

    let events = pilgrim.drain();
    assert_eq!(events.len(), 2);
    match &events[0] {
        OutboundEvent::NavBeacon(notice) => {
            assert!(!notice.enabled);
            assert_eq!(notice.lat, None);
            assert_eq!(notice.moderator_id.as_deref(), Some("M1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        events[1],
        OutboundEvent::StatusUpdate(StatusUpdate {
            pilgrim_id: "M1".into(),
            active: false,
            last_active_at: t0() + Duration::seconds(5),
        })
    );
    Ok(())
}

/// 双方在线：offer → answer → 30 秒后 end
#[tokio::test]
async fn test_answered_call_completes_with_duration() -> Result<()> {
    let harness = Harness::new(true).await;
    let (mut x, mut y) = connected_pair(&harness).await;

    harness
        .send(
            &x,
            json!({"event": "call-offer", "data": {"to": "P1", "channelName": "c1"}}),
        )
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.caller_id, uid("M1"));
    assert_eq!(record.receiver_id, uid("P1"));
    assert_eq!(record.status, CallStatus::Ringing);

    let events = y.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::CallOffer(notice) => {
            assert_eq!(notice.channel_name.as_deref(), Some("c1"));
            assert_eq!(notice.from, "M1");
            assert_eq!(notice.caller_info.name, "Yusuf");
            assert_eq!(notice.caller_info.role, "moderator");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // 在线时同样发送备用推送
    let pushes = harness.push.sent();
    assert_eq!(pushes.len(), 1);
    let (token, payload) = &pushes[0];
    assert_eq!(token, P1_TOKEN);
    assert_eq!(payload.kind(), PushKind::DataOnly);
    assert_eq!(payload.data()["type"], "incoming_call");
    assert_eq!(payload.data()["callerName"], "Yusuf");
    assert_eq!(payload.data()["channelName"], "c1");
    assert_eq!(payload.data()["callId"], record.id.to_string());

    assert_eq!(harness.active_call(&x).await, Some(record.id.to_string()));
    assert_eq!(harness.active_call(&y).await, Some(record.id.to_string()));

    harness
        .send(&y, json!({"event": "call-answer", "data": {"to": "M1"}}))
        .await;
    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::InProgress);
    assert_eq!(record.started_at, Some(t0()));
    assert_eq!(
        x.drain(),
        vec![OutboundEvent::CallAnswer(CallAnswerNotice {
            from: "P1".into(),
            answer: None,
        })]
    );

    harness.clock.advance(Duration::seconds(30));
    harness
        .send(&y, json!({"event": "call-end", "data": {"to": "M1"}}))
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.duration, 30);
    assert_eq!(record.ended_at, Some(t0() + Duration::seconds(30)));
    assert_eq!(
        x.drain(),
        vec![OutboundEvent::CallEnd(PeerNotice { from: "P1".into() })]
    );
    assert!(harness.active_call(&x).await.is_none());
    assert!(harness.active_call(&y).await.is_none());

    // 重复的结束信令不会改写终态
    harness
        .send(&x, json!({"event": "call-end", "data": {"to": "P1"}}))
        .await;
    let again = harness.only_record().await;
    assert_eq!(again.status, CallStatus::Completed);
    assert_eq!(again.duration, 30);
    Ok(())
}

#[tokio::test]
async fn test_offer_to_unreachable_target_without_token() -> Result<()> {
    let harness = Harness::new(false).await;
    let x = harness.connect().await;
    harness.register(&x, "M1", "moderator").await;

    harness
        .send(
            &x,
            json!({"event": "call-offer", "data": {"to": "P1", "channelName": "c1"}}),
        )
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::Ringing);
    assert!(harness.push.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_offer_to_offline_target_is_push_only() -> Result<()> {
    let harness = Harness::new(true).await;
    let x = harness.connect().await;
    harness.register(&x, "M1", "moderator").await;

    harness
        .send(
            &x,
            json!({"event": "call-offer", "data": {"to": "P1", "offer": {"type": "offer", "sdp": "v=0"}}}),
        )
        .await;

    harness.only_record().await;
    let pushes = harness.push.sent();
    assert_eq!(pushes.len(), 1);
    let (_, payload) = &pushes[0];
    assert_eq!(payload.kind(), PushKind::DataOnly);
    assert_eq!(payload.data()["type"], "incoming_call");
    assert_eq!(payload.data()["priority"], "urgent");
    let offer: Value = serde_json::from_str(&payload.data()["offer"])?;
    assert_eq!(offer["sdp"], "v=0");
    Ok(())
}

#[tokio::test]
async fn test_offer_from_unregistered_connection_is_ignored() -> Result<()> {
    let harness = Harness::new(true).await;
    let anonymous = harness.connect().await;
    harness
        .send(&anonymous, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;

    assert!(harness.calls.all().await.is_empty());
    assert!(harness.push.sent().is_empty());
    Ok(())
}

/// 响铃中结束：未接、时长为 0，被叫收到未接通知
#[tokio::test]
async fn test_end_while_ringing_is_missed() -> Result<()> {
    let harness = Harness::new(true).await;
    let (x, mut y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness.clock.advance(Duration::seconds(12));
    harness
        .send(&x, json!({"event": "call-end", "data": {"to": "P1"}}))
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::Missed);
    assert_eq!(record.duration, 0);
    assert_eq!(record.ended_at, Some(t0() + Duration::seconds(12)));

    let events = y.drain();
    let names: Vec<&str> = events.iter().map(OutboundEvent::name).collect();
    assert_eq!(names, vec!["call-offer", "call-end", "missed-call-received"]);
    assert_eq!(
        events[2],
        OutboundEvent::MissedCallReceived(MissedCallNotice {
            call_id: record.id.to_string(),
            caller_id: "M1".into(),
            caller_name: "Yusuf".into(),
        })
    );

    let pushes = harness.push.sent();
    assert_eq!(pushes.len(), 2);
    let (_, missed) = &pushes[1];
    assert_eq!(missed.kind(), PushKind::Visible);
    assert_eq!(missed.data()["type"], "missed_call");
    assert_eq!(missed.data()["priority"], "normal");
    match missed {
        PushPayload::Visible { body, urgent, .. } => {
            assert_eq!(body, "You missed a call from Yusuf");
            assert!(!urgent);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    assert!(harness.active_call(&x).await.is_none());
    assert!(harness.active_call(&y).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_declined_call_is_terminal() -> Result<()> {
    let harness = Harness::new(false).await;
    let (mut x, y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness.clock.advance(Duration::seconds(3));
    harness
        .send(&y, json!({"event": "call-declined", "data": {"to": "M1"}}))
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::Declined);
    assert_eq!(record.ended_at, Some(t0() + Duration::seconds(3)));
    assert_eq!(
        x.drain(),
        vec![OutboundEvent::CallDeclined(PeerNotice { from: "P1".into() })]
    );
    assert!(harness.active_call(&x).await.is_none());
    assert!(harness.active_call(&y).await.is_none());

    harness
        .send(&x, json!({"event": "call-end", "data": {"to": "P1"}}))
        .await;
    assert_eq!(harness.only_record().await.status, CallStatus::Declined);
    Ok(())
}

#[tokio::test]
async fn test_cancel_busy_and_ice_are_pure_relays() -> Result<()> {
    let harness = Harness::new(false).await;
    let (mut x, mut y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    y.drain();

    harness
        .send(
            &x,
            json!({"event": "ice-candidate", "data": {"to": "P1", "candidate": {"candidate": "a=1", "sdpMid": "0"}}}),
        )
        .await;
    harness
        .send(&y, json!({"event": "call-busy", "data": {"to": "M1"}}))
        .await;
    harness
        .send(&x, json!({"event": "call-cancel", "data": {"to": "P1"}}))
        .await;

    let to_callee = y.drain();
    assert_eq!(to_callee.len(), 2);
    match &to_callee[0] {
        OutboundEvent::IceCandidate(notice) => {
            assert_eq!(notice.from, "M1");
            assert_eq!(notice.candidate["sdpMid"], "0");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        to_callee[1],
        OutboundEvent::CallCancel(PeerNotice { from: "M1".into() })
    );
    assert_eq!(
        x.drain(),
        vec![OutboundEvent::CallBusy(PeerNotice { from: "P1".into() })]
    );

    assert_eq!(harness.only_record().await.status, CallStatus::Ringing);
    Ok(())
}

/// 通话中的被叫收到第二个呼叫时保留原通话
#[tokio::test]
async fn test_second_offer_does_not_clobber_active_call() -> Result<()> {
    let harness = Harness::new(false).await;
    let (x, y) = connected_pair(&harness).await;
    let mut other = harness.connect().await;
    harness.register(&other, "M2", "moderator").await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness
        .send(&y, json!({"event": "call-answer", "data": {"to": "M1"}}))
        .await;
    let first = harness.only_record().await.id.to_string();

    harness.clock.advance(Duration::seconds(1));
    harness
        .send(&other, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    assert_eq!(harness.active_call(&y).await, Some(first.clone()));

    harness
        .send(&y, json!({"event": "call-busy", "data": {"to": "M2"}}))
        .await;
    harness
        .send(&other, json!({"event": "call-end", "data": {"to": "P1"}}))
        .await;
    assert_eq!(harness.active_call(&y).await, Some(first.clone()));
    other.drain();

    harness.clock.advance(Duration::seconds(20));
    harness
        .send(&y, json!({"event": "call-end", "data": {"to": "M1"}}))
        .await;

    let records = harness.calls.all().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id.to_string(), first);
    assert_eq!(records[0].status, CallStatus::Completed);
    assert_eq!(records[0].duration, 21);
    assert_eq!(records[1].caller_id, uid("M2"));
    assert_eq!(records[1].status, CallStatus::Missed);
    Ok(())
}

/// 主叫响铃中断线后被叫仍持有旧通话，接听第二个主叫时记录归属正确
#[tokio::test]
async fn test_answer_after_caller_vanished_targets_new_call() -> Result<()> {
    let harness = Harness::new(true).await;
    let (x, mut y) = connected_pair(&harness).await;
    let mut other = harness.connect().await;
    harness.register(&other, "M2", "moderator").await;
    other.drain();

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    let stale = harness.only_record().await.id.to_string();
    harness.coordinator.disconnect(x.id).await;

    harness.clock.advance(Duration::seconds(1));
    harness
        .send(&other, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    assert_eq!(harness.active_call(&y).await, Some(stale.clone()));

    harness
        .send(&y, json!({"event": "call-answer", "data": {"to": "M2"}}))
        .await;
    let records = harness.calls.all().await;
    let second = records[1].id.to_string();
    assert_eq!(harness.active_call(&y).await, Some(second.clone()));

    harness.clock.advance(Duration::seconds(30));
    harness
        .send(&other, json!({"event": "call-end", "data": {"to": "P1"}}))
        .await;

    let records = harness.calls.all().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id.to_string(), stale);
    assert_eq!(records[0].status, CallStatus::Ringing);
    assert_eq!(records[1].caller_id, uid("M2"));
    assert_eq!(records[1].status, CallStatus::Completed);
    assert_eq!(records[1].duration, 30);

    assert!(
        !y.drain()
            .iter()
            .any(|event| event.name() == "missed-call-received")
    );
    assert!(
        harness
            .push
            .sent()
            .iter()
            .all(|(_, payload)| payload.data()["type"] == "incoming_call")
    );
    Ok(())
}

/// 被叫在响铃中结束：主叫收到的未接通知不带自己的姓名
#[tokio::test]
async fn test_receiver_ending_ringing_call_notifies_caller_without_own_name() -> Result<()> {
    let harness = Harness::new(false).await;
    let (mut x, y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness
        .send(&y, json!({"event": "call-end", "data": {"to": "M1"}}))
        .await;

    let record = harness.only_record().await;
    assert_eq!(record.status, CallStatus::Missed);
    assert_eq!(
        x.drain(),
        vec![
            OutboundEvent::CallEnd(PeerNotice { from: "P1".into() }),
            OutboundEvent::MissedCallReceived(MissedCallNotice {
                call_id: record.id.to_string(),
                caller_id: "M1".into(),
                caller_name: "Someone".into(),
            }),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_disconnect_mid_call_leaves_record_untouched() -> Result<()> {
    let harness = Harness::new(false).await;
    let (x, y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness
        .send(&y, json!({"event": "call-answer", "data": {"to": "M1"}}))
        .await;
    harness.coordinator.disconnect(y.id).await;

    assert_eq!(harness.only_record().await.status, CallStatus::InProgress);
    Ok(())
}

#[tokio::test]
async fn test_ringing_call_expires_after_timeout() -> Result<()> {
    let harness = Harness::with_ring_timeout(true, Some(StdDuration::from_millis(20))).await;
    let (mut x, mut y) = connected_pair(&harness).await;

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;

    let mut status = CallStatus::Ringing;
    for _ in 0..100 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        status = harness.only_record().await.status;
        if status == CallStatus::Missed {
            break;
        }
    }
    assert_eq!(status, CallStatus::Missed);
    // 未接记录写入后通知仍在发送，等待被叫收齐
    for _ in 0..100 {
        if harness.active_call(&y).await.is_none() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    let names: Vec<&'static str> = y.drain().iter().map(OutboundEvent::name).collect();
    assert_eq!(names, vec!["call-offer", "call-cancel", "missed-call-received"]);
    assert_eq!(
        x.drain(),
        vec![OutboundEvent::CallEnd(PeerNotice { from: "P1".into() })]
    );
    assert!(harness.active_call(&x).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_ring_timeout_skips_answered_call() -> Result<()> {
    let harness = Harness::new(false).await;
    let (x, y) = connected_pair(&harness).await;
    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    harness
        .send(&y, json!({"event": "call-answer", "data": {"to": "M1"}}))
        .await;

    let record = harness.only_record().await;
    harness
        .coordinator
        .expire_ringing_call(&record.id, &uid("M1"), &uid("P1"))
        .await;
    assert_eq!(harness.only_record().await.status, CallStatus::InProgress);
    Ok(())
}

#[tokio::test]
async fn test_call_history_reflects_missed_calls() -> Result<()> {
    let harness = Harness::new(false).await;
    let (x, _y) = connected_pair(&harness).await;
    let history = CallHistoryService::new(harness.calls.clone());

    for _ in 0..2 {
        harness
            .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
            .await;
        harness.clock.advance(Duration::seconds(1));
        harness
            .send(&x, json!({"event": "call-end", "data": {"to": "P1"}}))
            .await;
    }

    let records = assert_ok!(history.history_for(&uid("P1"), None).await);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == CallStatus::Missed));
    assert_eq!(assert_ok!(history.unread_missed_count(&uid("P1")).await), 2);
    assert_eq!(assert_ok!(history.unread_missed_count(&uid("M1")).await), 0);
    assert_eq!(assert_ok!(history.mark_missed_read(&uid("P1")).await), 2);
    assert_eq!(assert_ok!(history.unread_missed_count(&uid("P1")).await), 0);
    Ok(())
}

#[tokio::test]
async fn test_broadcaster_reaches_coordinator_rooms() -> Result<()> {
    let harness = Harness::new(false).await;
    let mut member = harness.connect().await;
    let mut pilgrim = harness.connect().await;
    harness.register(&pilgrim, "P1", "pilgrim").await;
    harness
        .send(&member, json!({"event": "join_group", "data": {"groupId": "G1"}}))
        .await;
    member.drain();
    pilgrim.drain();

    let broadcaster = RoomBroadcaster::new(harness.registry.clone());
    let mut payload = serde_json::Map::new();
    payload.insert("groupId".into(), json!("G1"));
    let delivered = broadcaster
        .emit_to_group(
            &GroupId::parse("G1").unwrap(),
            OutboundEvent::SosAlertReceived(payload),
        )
        .await;
    assert_eq!(delivered, 1);
    assert_eq!(member.drain().len(), 1);

    let delivered = broadcaster
        .emit_to_user(&uid("P1"), OutboundEvent::CallBusy(PeerNotice { from: "M1".into() }))
        .await;
    assert_eq!(delivered, 1);
    assert_eq!(pilgrim.drain().len(), 1);
    assert!(member.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_multi_device_user_receives_offer_on_every_connection() -> Result<()> {
    let harness = Harness::new(false).await;
    let (x, mut phone) = connected_pair(&harness).await;
    let mut tablet = harness.connect().await;
    harness.register(&tablet, "P1", "pilgrim").await;
    tablet.drain();

    harness
        .send(&x, json!({"event": "call-offer", "data": {"to": "P1"}}))
        .await;
    assert_eq!(phone.drain().len(), 1);
    assert_eq!(tablet.drain().len(), 1);

    // 任一设备断开后另一设备仍可达
    harness.coordinator.disconnect(phone.id).await;
    assert!(harness.registry.is_user_reachable(&uid("P1")).await);
    Ok(())
}
