//! 会话协调器
//!
//! 每条连接的事件按到达顺序逐个处理；不同连接的事件可以交错。
//! 处理器内部的任何失败只记录日志，不会中断连接。

use std::sync::Arc;
use std::time::Duration;

use pilgrim_core::metrics::SignalingGatewayMetrics;
use pilgrim_core::utils::Clock;
use pilgrim_push::PushDispatcher;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::event::{
    BatteryUpdate, GroupRef, InboundEvent, NavBeaconNotice, NavBeaconRequest, OutboundEvent,
    RegisterUserRequest, RelayPayload, StatusUpdate,
};
use crate::domain::model::NavBeacon;
use crate::domain::repository::CallRecordRepository;
use crate::domain::service::DirectoryService;
use crate::domain::value_object::{ConnectionId, Role, RoomKey, UserId};
use crate::infrastructure::{BindOutcome, RoomRegistry};

#[derive(Clone)]
pub struct SessionCoordinator {
    pub(crate) registry: Arc<RoomRegistry>,
    pub(crate) directory: Arc<DirectoryService>,
    pub(crate) calls: Arc<dyn CallRecordRepository>,
    pub(crate) push: PushDispatcher,
    pub(crate) metrics: Arc<SignalingGatewayMetrics>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ring_timeout: Option<Duration>,
}

impl SessionCoordinator {
    pub fn new(
        registry: Arc<RoomRegistry>,
        directory: Arc<DirectoryService>,
        calls: Arc<dyn CallRecordRepository>,
        push: PushDispatcher,
        metrics: Arc<SignalingGatewayMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            directory,
            calls,
            push,
            metrics,
            clock,
            ring_timeout: None,
        }
    }

    pub fn with_ring_timeout(mut self, ring_timeout: Option<Duration>) -> Self {
        self.ring_timeout = ring_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// 新连接建立：登记出站通道并创建空会话
    pub async fn connect(&self, outbound: UnboundedSender<OutboundEvent>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.registry
            .register_connection(connection_id, outbound)
            .await;
        self.metrics.connections_active.inc();
        info!(connection_id = %connection_id, "connection opened");
        connection_id
    }

    /// 分发一条入站事件
    pub async fn handle(&self, connection_id: ConnectionId, event: InboundEvent) {
        self.metrics
            .inbound_events_total
            .with_label_values(&[event.name()])
            .inc();

        match event {
            InboundEvent::RegisterUser(req) => self.register(connection_id, req).await,
            InboundEvent::JoinGroup(group) => self.join_group(connection_id, group).await,
            InboundEvent::LeaveGroup(group) => self.leave_group(connection_id, group).await,
            InboundEvent::UpdateLocation(payload) => {
                self.relay_location(connection_id, payload).await
            }
            InboundEvent::SosAlert(payload) => self.relay_sos(connection_id, payload).await,
            InboundEvent::SosCancel(payload) => {
                self.relay_sos_cancel(connection_id, payload).await
            }
            InboundEvent::NavBeacon(req) => self.nav_beacon(connection_id, req).await,
            InboundEvent::CallOffer(req) => self.call_offer(connection_id, req).await,
            InboundEvent::CallAnswer(req) => self.call_answer(connection_id, req).await,
            InboundEvent::IceCandidate(req) => self.ice_candidate(connection_id, req).await,
            InboundEvent::CallDeclined(req) => self.call_declined(connection_id, req).await,
            InboundEvent::CallCancel(req) => self.call_cancel(connection_id, req).await,
            InboundEvent::CallBusy(req) => self.call_busy(connection_id, req).await,
            InboundEvent::CallEnd(req) => self.call_end(connection_id, req).await,
        }
    }

    /// 无法解析的帧
    pub fn record_malformed(&self, connection_id: ConnectionId, reason: &str) {
        self.metrics.malformed_events_total.inc();
        debug!(connection_id = %connection_id, reason, "malformed frame dropped");
    }

    /// 已注册连接的用户标识
    pub(crate) async fn registered_user(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.registry
            .session(connection_id)
            .await
            .and_then(|session| session.user_id)
    }

    pub(crate) fn count_relay(&self, path: &str, delivered: usize) {
        if delivered > 0 {
            self.metrics
                .relay_deliveries_total
                .with_label_values(&[path])
                .inc_by(delivered as u64);
        }
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn register(&self, connection_id: ConnectionId, req: RegisterUserRequest) {
        let Some(user_id) = req.user_id() else {
            debug!("register-user without userId ignored");
            return;
        };
        let role = Role::from_wire(req.role.as_deref());

        match self
            .registry
            .bind_user(connection_id, user_id.clone(), role)
            .await
        {
            BindOutcome::Bound | BindOutcome::Refreshed => {}
            BindOutcome::Rejected { .. } | BindOutcome::UnknownConnection => return,
        }

        let now = self.clock.now();
        if let Err(err) = self.directory.set_presence(&user_id, role, true, now).await {
            error!(user_id = %user_id, error = %err, "failed to mark user online");
        }
        info!(user_id = %user_id, role = %role, "user registered");
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn join_group(&self, connection_id: ConnectionId, group: GroupRef) {
        let Some(group_id) = group.group_id() else {
            debug!("join_group without groupId ignored");
            return;
        };
        let room = RoomKey::Group(group_id.clone());
        self.registry.join_room(connection_id, room.clone()).await;

        let Some(session) = self
            .registry
            .update_session(connection_id, |session| {
                session.current_group_id = Some(group_id.clone());
                session.clone()
            })
            .await
        else {
            return;
        };

        if let Some(user_id) = &session.user_id {
            let status = OutboundEvent::StatusUpdate(StatusUpdate {
                pilgrim_id: user_id.to_string(),
                active: true,
                last_active_at: self.clock.now(),
            });
            let delivered = self.registry.broadcast_to_room(&room, status, None).await;
            self.count_relay("room", delivered);
        }

        // 补发同组其他连接正在广播的导航信标
        for other in self.registry.list_sessions_in_room(&room).await {
            if other.connection_id == connection_id {
                continue;
            }
            if let Some(beacon) = other.nav_beacon.filter(|b| b.group_id == group_id) {
                self.registry
                    .send_to_connection(connection_id, beacon_enabled_notice(&beacon))
                    .await;
            }
        }
        info!(group_id = %group_id, "joined group room");
    }

    /// 只退出房间；`current_group_id` 保留到断开时使用
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn leave_group(&self, connection_id: ConnectionId, group: GroupRef) {
        let Some(group_id) = group.group_id() else {
            return;
        };
        self.registry
            .leave_room(connection_id, &RoomKey::Group(group_id.clone()))
            .await;
        info!(group_id = %group_id, "left group room");
    }

    /// 位置更新转发给房间内其他连接；带电量时另行定向通知主体
    pub async fn relay_location(&self, connection_id: ConnectionId, payload: RelayPayload) {
        let Some(group_id) = payload.group_id() else {
            return;
        };
        let battery = payload.battery_percent();
        let subject = payload.subject_id();

        let delivered = self
            .registry
            .broadcast_to_room(
                &RoomKey::Group(group_id),
                OutboundEvent::LocationUpdate(payload.into_map()),
                Some(connection_id),
            )
            .await;
        self.count_relay("room", delivered);

        if let (Some(battery_percent), Some(subject)) = (battery, subject) {
            let delivered = self
                .registry
                .send_to_user(
                    &subject,
                    OutboundEvent::BatteryUpdate(BatteryUpdate {
                        battery_percent,
                        pilgrim_id: subject.to_string(),
                    }),
                )
                .await;
            self.count_relay("user", delivered);
        }
    }

    /// SOS 发给整个房间，包括发送者
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn relay_sos(&self, connection_id: ConnectionId, payload: RelayPayload) {
        let Some(group_id) = payload.group_id() else {
            return;
        };
        warn!(
            group_id = %group_id,
            pilgrim_id = ?payload.subject_id(),
            "sos alert received"
        );
        let delivered = self
            .registry
            .broadcast_to_room(
                &RoomKey::Group(group_id),
                OutboundEvent::SosAlertReceived(payload.into_map()),
                None,
            )
            .await;
        self.count_relay("room", delivered);
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn relay_sos_cancel(&self, connection_id: ConnectionId, payload: RelayPayload) {
        let Some(group_id) = payload.group_id() else {
            return;
        };
        info!(group_id = %group_id, pilgrim_id = ?payload.subject_id(), "sos alert cancelled");
        let delivered = self
            .registry
            .broadcast_to_room(
                &RoomKey::Group(group_id),
                OutboundEvent::SosAlertCancelled(payload.into_map()),
                None,
            )
            .await;
        self.count_relay("room", delivered);
    }

    /// 发布或撤回导航信标
    pub async fn nav_beacon(&self, connection_id: ConnectionId, req: NavBeaconRequest) {
        let Some(group_id) = req.group_id() else {
            return;
        };

        let notice = if req.enabled {
            let (Some(lat), Some(lng)) = (req.lat, req.lng) else {
                debug!(connection_id = %connection_id, "mod_nav_beacon enabled without coordinates ignored");
                return;
            };
            let beacon = NavBeacon {
                group_id: group_id.clone(),
                lat,
                lng,
                broadcaster_id: req.moderator_id(),
                broadcaster_name: req.moderator_name.clone(),
            };
            let notice = beacon_enabled_notice(&beacon);
            self.registry
                .update_session(connection_id, |session| session.nav_beacon = Some(beacon))
                .await;
            notice
        } else {
            self.registry
                .update_session(connection_id, |session| session.nav_beacon = None)
                .await;
            OutboundEvent::NavBeacon(NavBeaconNotice {
                group_id: group_id.to_string(),
                enabled: false,
                lat: None,
                lng: None,
                moderator_id: req.moderator_id(),
                moderator_name: req.moderator_name.clone(),
            })
        };

        let delivered = self
            .registry
            .broadcast_to_room(
                &RoomKey::Group(group_id),
                notice,
                Some(connection_id),
            )
            .await;
        self.count_relay("room", delivered);
    }

    /// 断开清理：信标撤回 → 离线标记 → 群组离线广播
    ///
    /// `active_call_id` 不做处理，断线中的通话不会被自动判定。
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(session) = self.registry.remove_connection(connection_id).await else {
            return;
        };
        self.metrics.connections_active.dec();

        if let Some(beacon) = &session.nav_beacon {
            let retraction = NavBeaconNotice {
                group_id: beacon.group_id.to_string(),
                enabled: false,
                lat: None,
                lng: None,
                moderator_id: beacon.broadcaster_id.clone(),
                moderator_name: beacon.broadcaster_name.clone(),
            };
            let delivered = self
                .registry
                .broadcast_to_room(
                    &RoomKey::Group(beacon.group_id.clone()),
                    OutboundEvent::NavBeacon(retraction),
                    None,
                )
                .await;
            self.count_relay("room", delivered);
        }

        let Some(user_id) = &session.user_id else {
            info!("anonymous connection closed");
            return;
        };

        let now = self.clock.now();
        if let Err(err) = self
            .directory
            .set_presence(user_id, session.role, false, now)
            .await
        {
            error!(user_id = %user_id, error = %err, "failed to mark user offline");
        }

        if let Some(group_id) = &session.current_group_id {
            let status = OutboundEvent::StatusUpdate(StatusUpdate {
                pilgrim_id: user_id.to_string(),
                active: false,
                last_active_at: now,
            });
            let delivered = self
                .registry
                .broadcast_to_room(&RoomKey::Group(group_id.clone()), status, None)
                .await;
            self.count_relay("room", delivered);
        }

        if let Some(call_id) = &session.active_call_id {
            debug!(user_id = %user_id, call_id = %call_id, "connection closed with active call");
        }
        info!(user_id = %user_id, "connection closed");
    }
}

fn beacon_enabled_notice(beacon: &NavBeacon) -> OutboundEvent {
    OutboundEvent::NavBeacon(NavBeaconNotice {
        group_id: beacon.group_id.to_string(),
        enabled: true,
        lat: Some(beacon.lat),
        lng: Some(beacon.lng),
        moderator_id: beacon.broadcaster_id.clone(),
        moderator_name: beacon.broadcaster_name.clone(),
    })
}
