//! 通话信令
//!
//! offer / answer / ice / declined / cancel / busy / end，
//! 通话记录随状态迁移写入存储。信令转发与记录写入不是事务性的：
//! 写入失败只记日志，已发出的转发不回滚。

use std::time::Duration;

use pilgrim_core::error::ErrorCode;
use pilgrim_push::PushNotification;
use tracing::{debug, error, info, instrument, warn};

use super::coordinator::SessionCoordinator;
use crate::domain::event::{
    CallAnswerNotice, CallAnswerRequest, CallOfferNotice, CallOfferRequest, CallerInfo,
    IceCandidateNotice, IceCandidateRequest, MissedCallNotice, OutboundEvent, PeerNotice,
    PeerRequest,
};
use crate::domain::model::{CallRecord, CallStatus, CallTransition};
use crate::domain::service::classify_call_end;
use crate::domain::value_object::{CallId, ConnectionId, UserId};

const UNKNOWN_NAME: &str = "Unknown";
/// 被叫在响铃中结束时，主叫收到的未接通知不带来电者姓名
const UNNAMED_CALLER: &str = "Someone";

impl SessionCoordinator {
    /// 发起呼叫：创建响铃记录，在线直达并附带推送兜底，离线仅推送
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn call_offer(&self, connection_id: ConnectionId, req: CallOfferRequest) {
        let Some(target_id) = req.target() else {
            debug!("call-offer without target ignored");
            return;
        };
        let Some(caller_id) = self.registered_user(connection_id).await else {
            warn!("call-offer from unregistered connection ignored");
            return;
        };

        let caller = self.directory.lookup_or_none(&caller_id).await;
        let recipient = self.directory.lookup_or_none(&target_id).await;
        let caller_info = CallerInfo {
            id: caller_id.to_string(),
            name: caller
                .as_ref()
                .map(|c| c.display_name.clone())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            role: caller
                .as_ref()
                .map(|c| c.role.clone())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        };

        let call_id = match self
            .calls
            .create(&caller_id, &target_id, self.clock.now())
            .await
        {
            Ok(call_id) => {
                self.count_outcome(CallStatus::Ringing);
                Some(call_id)
            }
            Err(err) => {
                error!(caller_id = %caller_id, target_id = %target_id, error = %err, "failed to create call record");
                None
            }
        };

        if let Some(call_id) = &call_id {
            self.registry
                .update_session(connection_id, |session| {
                    session.active_call_id = Some(call_id.clone())
                })
                .await;
            // 已在其他通话中的被叫会话保持原通话
            self.registry
                .update_user_sessions(&target_id, |session| {
                    if session.active_call_id.is_none() {
                        session.active_call_id = Some(call_id.clone());
                    }
                })
                .await;
        }

        let reachable = self.registry.is_user_reachable(&target_id).await;
        if reachable {
            let offer = OutboundEvent::CallOffer(CallOfferNotice {
                channel_name: req.channel_name.clone(),
                from: caller_id.to_string(),
                caller_info: caller_info.clone(),
                offer: req.offer.clone(),
            });
            let delivered = self.registry.send_to_user(&target_id, offer).await;
            self.count_relay("user", delivered);
        }

        match recipient.and_then(|r| r.push_token) {
            Some(token) => {
                let mut notification = PushNotification::new(
                    "Incoming Call",
                    format!("{} is calling you", caller_info.name),
                )
                .with_data("type", "incoming_call")
                .with_data("callerId", caller_id.as_str())
                .with_data("callerName", caller_info.name.as_str())
                .with_data("callerRole", caller_info.role.as_str())
                .urgent(true);
                if let Some(channel) = &req.channel_name {
                    notification = notification.with_data("channelName", channel.as_str());
                }
                if let Some(call_id) = &call_id {
                    notification = notification.with_data("callId", call_id.as_str());
                }
                if let Some(offer) = &req.offer {
                    notification = notification.with_data("offer", offer.to_string());
                }

                let report = self.push.send(&[token], &notification).await;
                self.count_relay("push", report.success_count);
                if report.all_failed() {
                    warn!(target_id = %target_id, "incoming call push rejected for every token");
                }
            }
            None if !reachable => {
                info!(target_id = %target_id, "target offline without push token, call-offer not delivered");
            }
            None => {}
        }

        info!(
            caller_id = %caller_id,
            target_id = %target_id,
            call_id = ?call_id.as_ref().map(CallId::as_str),
            reachable,
            "call offered"
        );

        if let (Some(call_id), Some(timeout)) = (call_id, self.ring_timeout) {
            self.schedule_ring_timeout(call_id, caller_id, target_id, timeout);
        }
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn call_answer(&self, connection_id: ConnectionId, req: CallAnswerRequest) {
        let Some(peer_id) = req.target() else {
            return;
        };
        let Some(user_id) = self.registered_user(connection_id).await else {
            warn!("call-answer from unregistered connection ignored");
            return;
        };

        let delivered = self
            .registry
            .send_to_user(
                &peer_id,
                OutboundEvent::CallAnswer(CallAnswerNotice {
                    from: user_id.to_string(),
                    answer: req.answer.clone(),
                }),
            )
            .await;
        self.count_relay("user", delivered);

        let Some(call_id) = self.resolve_call_id(connection_id, &user_id, &peer_id).await else {
            debug!(peer_id = %peer_id, "call-answer without active call record");
            return;
        };
        // 被推送唤醒后新建的连接在这里接管通话
        self.registry
            .update_session(connection_id, |session| {
                session.active_call_id = Some(call_id.clone())
            })
            .await;

        self.apply_transition(&call_id, CallTransition::answered(self.clock.now()))
            .await;
    }

    pub async fn ice_candidate(&self, connection_id: ConnectionId, req: IceCandidateRequest) {
        let (Some(peer_id), Some(candidate)) = (req.target(), req.candidate.clone()) else {
            return;
        };
        let Some(user_id) = self.registered_user(connection_id).await else {
            return;
        };
        let delivered = self
            .registry
            .send_to_user(
                &peer_id,
                OutboundEvent::IceCandidate(IceCandidateNotice {
                    candidate,
                    from: user_id.to_string(),
                }),
            )
            .await;
        self.count_relay("user", delivered);
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn call_declined(&self, connection_id: ConnectionId, req: PeerRequest) {
        let Some(peer_id) = req.target() else {
            return;
        };
        let Some(user_id) = self.registered_user(connection_id).await else {
            return;
        };

        let delivered = self
            .registry
            .send_to_user(&peer_id, OutboundEvent::CallDeclined(OutboundEvent::peer(&user_id)))
            .await;
        self.count_relay("user", delivered);

        let Some(call_id) = self.resolve_call_id(connection_id, &user_id, &peer_id).await else {
            return;
        };
        self.apply_transition(&call_id, CallTransition::declined(self.clock.now()))
            .await;
        self.release_call(&call_id, &[&user_id, &peer_id]).await;
        info!(call_id = %call_id, user_id = %user_id, "call declined");
    }

    /// 主叫在接听前挂断，只通知被叫；记录由随后的 call-end 处理
    pub async fn call_cancel(&self, connection_id: ConnectionId, req: PeerRequest) {
        self.relay_peer_signal(connection_id, req, OutboundEvent::CallCancel)
            .await;
    }

    /// 被叫忙线，只通知主叫
    pub async fn call_busy(&self, connection_id: ConnectionId, req: PeerRequest) {
        self.relay_peer_signal(connection_id, req, OutboundEvent::CallBusy)
            .await;
    }

    /// 结束通话：响铃中判为未接，已接通判为完成
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn call_end(&self, connection_id: ConnectionId, req: PeerRequest) {
        let Some(user_id) = self.registered_user(connection_id).await else {
            return;
        };
        let peer_id = req.target();

        if let Some(peer_id) = &peer_id {
            let delivered = self
                .registry
                .send_to_user(peer_id, OutboundEvent::CallEnd(OutboundEvent::peer(&user_id)))
                .await;
            self.count_relay("user", delivered);
        }

        let call_id = match &peer_id {
            Some(peer_id) => self.resolve_call_id(connection_id, &user_id, peer_id).await,
            None => self
                .registry
                .session(connection_id)
                .await
                .and_then(|s| s.active_call_id),
        };
        let Some(call_id) = call_id else {
            debug!(user_id = %user_id, "call-end without active call record");
            return;
        };

        self.conclude_call(&call_id, &user_id).await;
    }

    /// 对当前仍在响铃或通话中的记录做结果判定并写入
    async fn conclude_call(&self, call_id: &CallId, ended_by: &UserId) {
        let record = match self.calls.get(call_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(call_id = %call_id, "call record not found");
                self.release_call(call_id, &[ended_by]).await;
                return;
            }
            Err(err) => {
                error!(call_id = %call_id, error = %err, "failed to load call record");
                return;
            }
        };
        let counterpart = record.counterpart_of(ended_by).clone();

        let Some(transition) = classify_call_end(&record, self.clock.now()) else {
            debug!(call_id = %call_id, status = %record.status, "call already concluded");
            self.release_call(call_id, &[ended_by, &counterpart]).await;
            return;
        };

        let outcome = transition.status;
        let duration = transition.duration.unwrap_or(0);
        if self.apply_transition(call_id, transition).await {
            info!(call_id = %call_id, outcome = %outcome, duration, "call concluded");
            if outcome == CallStatus::Missed {
                self.notify_missed_call(&record, &counterpart).await;
            }
        }
        self.release_call(call_id, &[ended_by, &counterpart]).await;
    }

    /// 通知错过来电的一方：在线时直达，另发可见推送
    async fn notify_missed_call(&self, record: &CallRecord, missed_by: &UserId) {
        let caller_name = if *missed_by == record.caller_id {
            UNNAMED_CALLER.to_string()
        } else {
            self.directory
                .lookup_or_none(&record.caller_id)
                .await
                .map(|entry| entry.display_name)
                .unwrap_or_else(|| UNKNOWN_NAME.to_string())
        };

        let delivered = self
            .registry
            .send_to_user(
                missed_by,
                OutboundEvent::MissedCallReceived(MissedCallNotice {
                    call_id: record.id.to_string(),
                    caller_id: record.caller_id.to_string(),
                    caller_name: caller_name.clone(),
                }),
            )
            .await;
        self.count_relay("user", delivered);

        let Some(token) = self
            .directory
            .lookup_or_none(missed_by)
            .await
            .and_then(|entry| entry.push_token)
        else {
            debug!(user_id = %missed_by, "no push token for missed call notification");
            return;
        };

        let notification = PushNotification::new(
            "Missed Call",
            format!("You missed a call from {caller_name}"),
        )
        .with_data("type", "missed_call")
        .with_data("callId", record.id.as_str())
        .with_data("callerId", record.caller_id.as_str())
        .with_data("callerName", caller_name.as_str());

        let report = self.push.send(&[token], &notification).await;
        self.count_relay("push", report.success_count);
    }

    fn schedule_ring_timeout(
        &self,
        call_id: CallId,
        caller_id: UserId,
        receiver_id: UserId,
        timeout: Duration,
    ) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator
                .expire_ringing_call(&call_id, &caller_id, &receiver_id)
                .await;
        });
    }

    /// 响铃超时：按未接处理，被叫收到取消与未接通知，主叫收到结束
    pub async fn expire_ringing_call(
        &self,
        call_id: &CallId,
        caller_id: &UserId,
        receiver_id: &UserId,
    ) {
        let record = match self.calls.get(call_id).await {
            Ok(Some(record)) if record.status == CallStatus::Ringing => record,
            Ok(_) => return,
            Err(err) => {
                error!(call_id = %call_id, error = %err, "failed to load call record on ring timeout");
                return;
            }
        };

        let Some(transition) = classify_call_end(&record, self.clock.now()) else {
            return;
        };
        if !self.apply_transition(call_id, transition).await {
            return;
        }
        info!(call_id = %call_id, "ringing call timed out");

        self.registry
            .send_to_user(receiver_id, OutboundEvent::CallCancel(OutboundEvent::peer(caller_id)))
            .await;
        self.registry
            .send_to_user(caller_id, OutboundEvent::CallEnd(OutboundEvent::peer(receiver_id)))
            .await;
        self.notify_missed_call(&record, receiver_id).await;
        self.release_call(call_id, &[caller_id, receiver_id]).await;
    }

    async fn relay_peer_signal(
        &self,
        connection_id: ConnectionId,
        req: PeerRequest,
        build: fn(PeerNotice) -> OutboundEvent,
    ) {
        let Some(peer_id) = req.target() else {
            return;
        };
        let Some(user_id) = self.registered_user(connection_id).await else {
            return;
        };
        let event = build(OutboundEvent::peer(&user_id));
        debug!(from = %user_id, to = %peer_id, event = event.name(), "relaying call signal");
        let delivered = self.registry.send_to_user(&peer_id, event).await;
        self.count_relay("user", delivered);
    }

    /// 对端会话持有的通话优先，其次本连接持有的通话；
    /// 只接受双方都参与的记录，断线主叫遗留的通话不会被误用
    async fn resolve_call_id(
        &self,
        connection_id: ConnectionId,
        user_id: &UserId,
        peer_id: &UserId,
    ) -> Option<CallId> {
        let mut candidates: Vec<CallId> = self
            .registry
            .sessions_for_user(peer_id)
            .await
            .into_iter()
            .filter_map(|s| s.active_call_id)
            .collect();
        if let Some(own) = self
            .registry
            .session(connection_id)
            .await
            .and_then(|s| s.active_call_id)
        {
            candidates.push(own);
        }

        for call_id in candidates {
            match self.calls.get(&call_id).await {
                Ok(Some(record)) if record.involves(user_id) && record.involves(peer_id) => {
                    return Some(call_id);
                }
                Ok(_) => {
                    debug!(call_id = %call_id, peer_id = %peer_id, "active call does not belong to this pair");
                }
                Err(err) => {
                    error!(call_id = %call_id, error = %err, "failed to load call record");
                }
            }
        }
        None
    }

    /// 写入状态迁移，成功返回 true
    async fn apply_transition(&self, call_id: &CallId, transition: CallTransition) -> bool {
        let status = transition.status;
        match self.calls.transition(call_id, transition).await {
            Ok(_) => {
                self.count_outcome(status);
                true
            }
            Err(err) if err.is(ErrorCode::InvalidStateTransition) => {
                warn!(call_id = %call_id, error = %err, "call record transition rejected");
                false
            }
            Err(err) => {
                error!(call_id = %call_id, error = %err, "failed to update call record");
                false
            }
        }
    }

    /// 清除相关用户会话上持有的该通话
    async fn release_call(&self, call_id: &CallId, users: &[&UserId]) {
        for user_id in users {
            self.registry
                .update_user_sessions(user_id, |session| {
                    session.release_call(call_id);
                })
                .await;
        }
    }

    fn count_outcome(&self, status: CallStatus) {
        self.metrics
            .call_outcomes_total
            .with_label_values(&[status.as_str()])
            .inc();
    }
}
