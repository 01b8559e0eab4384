//! 在线与房间注册表
//!
//! 连接、会话与房间成员关系放在同一把锁下，任意时刻
//! “某用户是否可达”只以个人房间的成员为准。

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::domain::event::OutboundEvent;
use crate::domain::model::Session;
use crate::domain::value_object::{ConnectionId, Role, RoomKey, UserId};

/// 绑定身份的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// 首次绑定
    Bound,
    /// 同一用户重复注册，仅刷新字段
    Refreshed,
    /// 连接已绑定其他用户
    Rejected { existing: UserId },
    UnknownConnection,
}

struct ConnectionSlot {
    outbound: UnboundedSender<OutboundEvent>,
    session: Session,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionSlot>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn join(&mut self, connection_id: ConnectionId, room: RoomKey) -> bool {
        let Some(slot) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        slot.rooms.insert(room.clone());
        self.rooms.entry(room).or_default().insert(connection_id)
    }

    fn leave(&mut self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        if let Some(slot) = self.connections.get_mut(&connection_id) {
            slot.rooms.remove(room);
        }
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    fn deliver(&self, connection_id: &ConnectionId, event: &OutboundEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(slot) => slot.outbound.send(event.clone()).is_ok(),
            None => false,
        }
    }

    fn members(&self, room: &RoomKey) -> impl Iterator<Item = &ConnectionId> {
        self.rooms.get(room).into_iter().flatten()
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_connection(
        &self,
        connection_id: ConnectionId,
        outbound: UnboundedSender<OutboundEvent>,
    ) {
        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            ConnectionSlot {
                outbound,
                session: Session::new(connection_id),
                rooms: HashSet::new(),
            },
        );
    }

    /// 移除连接及其全部房间成员关系，返回会话快照
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Option<Session> {
        let mut state = self.state.write().await;
        let slot = state.connections.remove(&connection_id)?;
        for room in &slot.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        Some(slot.session)
    }

    /// 绑定身份并加入个人房间
    pub async fn bind_user(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        role: Role,
    ) -> BindOutcome {
        let mut state = self.state.write().await;
        let Some(slot) = state.connections.get_mut(&connection_id) else {
            return BindOutcome::UnknownConnection;
        };

        let outcome = match &slot.session.user_id {
            None => BindOutcome::Bound,
            Some(existing) if existing == &user_id => BindOutcome::Refreshed,
            Some(existing) => {
                warn!(
                    connection_id = %connection_id,
                    existing = %existing,
                    requested = %user_id,
                    "connection already bound to another user"
                );
                return BindOutcome::Rejected {
                    existing: existing.clone(),
                };
            }
        };

        slot.session.user_id = Some(user_id.clone());
        slot.session.role = role;
        state.join(connection_id, RoomKey::User(user_id));
        outcome
    }

    /// 重复加入同一房间等价于加入一次
    pub async fn join_room(&self, connection_id: ConnectionId, room: RoomKey) -> bool {
        self.state.write().await.join(connection_id, room)
    }

    pub async fn leave_room(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        self.state.write().await.leave(connection_id, room)
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// 向房间广播，返回成功投递的连接数
    pub async fn broadcast_to_room(
        &self,
        room: &RoomKey,
        event: OutboundEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;
        let delivered = state
            .members(room)
            .filter(|id| Some(**id) != exclude)
            .filter(|id| state.deliver(id, &event))
            .count();
        debug!(room = %room, event = event.name(), delivered, "room broadcast");
        delivered
    }

    /// 投递到用户个人房间内的所有连接
    pub async fn send_to_user(&self, user_id: &UserId, event: OutboundEvent) -> usize {
        self.broadcast_to_room(&RoomKey::User(user_id.clone()), event, None)
            .await
    }

    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: OutboundEvent) -> bool {
        self.state.read().await.deliver(&connection_id, &event)
    }

    pub async fn find_connection_by_user_id(&self, user_id: &UserId) -> Option<ConnectionId> {
        let state = self.state.read().await;
        state.members(&RoomKey::User(user_id.clone())).next().copied()
    }

    pub async fn is_user_reachable(&self, user_id: &UserId) -> bool {
        self.find_connection_by_user_id(user_id).await.is_some()
    }

    pub async fn list_sessions_in_room(&self, room: &RoomKey) -> Vec<Session> {
        let state = self.state.read().await;
        state
            .members(room)
            .filter_map(|id| state.connections.get(id))
            .map(|slot| slot.session.clone())
            .collect()
    }

    pub async fn session(&self, connection_id: ConnectionId) -> Option<Session> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|slot| slot.session.clone())
    }

    pub async fn sessions_for_user(&self, user_id: &UserId) -> Vec<Session> {
        self.list_sessions_in_room(&RoomKey::User(user_id.clone()))
            .await
    }

    /// 在锁内修改单个会话
    pub async fn update_session<R>(
        &self,
        connection_id: ConnectionId,
        update: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut state = self.state.write().await;
        state
            .connections
            .get_mut(&connection_id)
            .map(|slot| update(&mut slot.session))
    }

    /// 在锁内修改某用户的全部会话，返回涉及的会话数
    pub async fn update_user_sessions(
        &self,
        user_id: &UserId,
        mut update: impl FnMut(&mut Session),
    ) -> usize {
        let mut state = self.state.write().await;
        let members: Vec<ConnectionId> = state
            .members(&RoomKey::User(user_id.clone()))
            .copied()
            .collect();
        let mut touched = 0;
        for id in members {
            if let Some(slot) = state.connections.get_mut(&id) {
                update(&mut slot.session);
                touched += 1;
            }
        }
        touched
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}
