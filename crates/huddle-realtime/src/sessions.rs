//! Connection registry, room membership, and presence.
//!
//! All registry state lives under one `RwLock` so a presence decision is
//! always made against the same connection count it is justified by: the
//! first connection for a user flips them Online and the removal of their
//! last one flips them Offline, with no window where another register or
//! unregister can observe a half-applied transition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use huddle_core::{ConnectionId, PresenceState, RoomId, UserId};

use crate::connection::ClientConnection;
use crate::identity::Identity;
use crate::protocol::ServerEvent;

/// Total dropped frames after which a client is forcibly disconnected.
const MAX_TOTAL_DROPS: u64 = 100;

/// Capacity of the presence notification channel.
const PRESENCE_CHANNEL_CAPACITY: usize = 256;

/// A presence transition, published on the notification channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceChange {
    /// The user whose presence changed.
    pub user_id: UserId,
    /// The new state.
    pub state: PresenceState,
}

/// Everything the manager tracks, guarded by a single lock.
#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    presence: HashMap<UserId, PresenceState>,
}

impl Registry {
    fn join(&mut self, conn_id: &ConnectionId, room: RoomId) {
        if !self.connections.contains_key(conn_id) {
            return;
        }
        let _ = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(conn_id.clone());
        let _ = self
            .memberships
            .entry(conn_id.clone())
            .or_default()
            .insert(room);
    }

    fn leave(&mut self, conn_id: &ConnectionId, room: &RoomId) {
        if let Some(members) = self.rooms.get_mut(room) {
            let _ = members.remove(conn_id);
            if members.is_empty() {
                let _ = self.rooms.remove(room);
            }
        }
        if let Some(rooms) = self.memberships.get_mut(conn_id) {
            let _ = rooms.remove(room);
        }
    }

    /// Remove a connection entirely. Returns the presence transition (and
    /// the group rooms to announce it to) if this was the user's last
    /// connection.
    fn remove(&mut self, conn_id: &ConnectionId) -> Option<(PresenceChange, Vec<RoomId>)> {
        let conn = self.connections.remove(conn_id)?;
        let rooms = self.memberships.remove(conn_id).unwrap_or_default();
        let group_rooms: Vec<RoomId> = rooms
            .iter()
            .filter(|r| matches!(r, RoomId::Group(_)))
            .cloned()
            .collect();
        for room in &rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                let _ = members.remove(conn_id);
                if members.is_empty() {
                    let _ = self.rooms.remove(room);
                }
            }
        }
        let user_id = conn.user_id.clone();
        let last = match self.user_connections.get_mut(&user_id) {
            Some(conns) => {
                let _ = conns.remove(conn_id);
                conns.is_empty()
            }
            None => true,
        };
        if last {
            let _ = self.user_connections.remove(&user_id);
            let _ = self.presence.insert(user_id.clone(), PresenceState::Offline);
            return Some((
                PresenceChange {
                    user_id,
                    state: PresenceState::Offline,
                },
                group_rooms,
            ));
        }
        None
    }
}

/// Manages live connections, their room subscriptions, and user presence.
pub struct SessionManager {
    registry: RwLock<Registry>,
    /// Mirror of the connection count for lock-free reads.
    active: AtomicUsize,
    presence_tx: broadcast::Sender<PresenceChange>,
}

impl SessionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self {
            registry: RwLock::new(Registry::default()),
            active: AtomicUsize::new(0),
            presence_tx,
        }
    }

    /// Register an authenticated connection.
    ///
    /// Auto-joins the connection to its user room and one group room per
    /// membership in the identity snapshot. The user's first live connection
    /// flips presence to Online.
    pub async fn register(&self, conn: Arc<ClientConnection>, identity: &Identity) {
        let change = {
            let mut reg = self.registry.write().await;
            let conn_id = conn.id.clone();
            let user_id = conn.user_id.clone();
            let _ = reg.connections.insert(conn_id.clone(), conn);
            reg.join(&conn_id, RoomId::User(user_id.clone()));
            for group in &identity.group_ids {
                reg.join(&conn_id, RoomId::Group(group.clone()));
            }
            let conns = reg.user_connections.entry(user_id.clone()).or_default();
            let _ = conns.insert(conn_id);
            let first = conns.len() == 1;
            if first {
                let _ = reg.presence.insert(user_id.clone(), PresenceState::Online);
                Some((
                    PresenceChange {
                        user_id,
                        state: PresenceState::Online,
                    },
                    identity
                        .group_ids
                        .iter()
                        .cloned()
                        .map(RoomId::Group)
                        .collect::<Vec<_>>(),
                ))
            } else {
                None
            }
        };
        let _ = self.active.fetch_add(1, Ordering::Relaxed);
        counter!("realtime_connections_total").increment(1);
        gauge!("realtime_connections_active").increment(1.0);
        if let Some((change, rooms)) = change {
            self.announce_presence(change, &rooms).await;
        }
    }

    /// Remove a connection and all of its room memberships.
    ///
    /// The user's last connection flips presence to Offline. Unknown IDs
    /// are a no-op.
    pub async fn unregister(&self, conn_id: &ConnectionId) {
        let change = {
            let mut reg = self.registry.write().await;
            if !reg.connections.contains_key(conn_id) {
                return;
            }
            reg.remove(conn_id)
        };
        let _ = self.active.fetch_sub(1, Ordering::Relaxed);
        gauge!("realtime_connections_active").decrement(1.0);
        if let Some((change, rooms)) = change {
            self.announce_presence(change, &rooms).await;
        }
    }

    /// Subscribe a connection to a room. Idempotent; no-op for unknown
    /// connections.
    pub async fn join_room(&self, conn_id: &ConnectionId, room: RoomId) {
        self.registry.write().await.join(conn_id, room);
    }

    /// Unsubscribe a connection from a room. No-op when not a member.
    pub async fn leave_room(&self, conn_id: &ConnectionId, room: &RoomId) {
        self.registry.write().await.leave(conn_id, room);
    }

    /// Mark a connected user Away. Ignored for users with no live
    /// connections, so an idle policy can never resurrect an offline user.
    pub async fn set_away(&self, user_id: &UserId) {
        let change = {
            let mut reg = self.registry.write().await;
            let Some(conns) = reg.user_connections.get(user_id) else {
                return;
            };
            let group_rooms: Vec<RoomId> = conns
                .iter()
                .filter_map(|c| reg.memberships.get(c))
                .flatten()
                .filter(|r| matches!(r, RoomId::Group(_)))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let _ = reg.presence.insert(user_id.clone(), PresenceState::Away);
            (
                PresenceChange {
                    user_id: user_id.clone(),
                    state: PresenceState::Away,
                },
                group_rooms,
            )
        };
        self.announce_presence(change.0, &change.1).await;
    }

    /// Current presence of a user. Unknown users are Offline.
    pub async fn presence(&self, user_id: &UserId) -> PresenceState {
        self.registry
            .read()
            .await
            .presence
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Number of users currently Online or Away.
    pub async fn online_users(&self) -> usize {
        self.registry
            .read()
            .await
            .presence
            .values()
            .filter(|state| state.is_connected())
            .count()
    }

    /// Number of connections subscribed to a room.
    pub async fn room_size(&self, room: &RoomId) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }

    /// Subscribe to presence transitions.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence_tx.subscribe()
    }

    /// Fan an event out to a room's subscribers.
    ///
    /// Serializes once and sends the shared frame to every member except
    /// the excluded origin. Clients whose cumulative drop count exceeds the
    /// limit are disconnected afterwards.
    pub async fn emit(&self, room: &RoomId, event: &ServerEvent, exclude: Option<&ConnectionId>) {
        let frame = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event = event.event, error = %e, "failed to serialize event");
                return;
            }
        };
        let slow = {
            let reg = self.registry.read().await;
            let Some(members) = reg.rooms.get(room) else {
                debug!(room = %room, event = event.event, "emit to empty room");
                return;
            };
            let mut slow = Vec::new();
            for conn_id in members {
                if Some(conn_id) == exclude {
                    continue;
                }
                let Some(conn) = reg.connections.get(conn_id) else {
                    continue;
                };
                if !conn.send(Arc::clone(&frame)) {
                    counter!("realtime_messages_dropped_total").increment(1);
                    if conn.drop_count() > MAX_TOTAL_DROPS {
                        slow.push(conn_id.clone());
                    }
                }
            }
            counter!("realtime_broadcasts_total").increment(1);
            slow
        };
        for conn_id in slow {
            warn!(conn_id = %conn_id, room = %room, "disconnecting slow client");
            self.unregister(&conn_id).await;
        }
    }

    /// Publish a presence transition and notify the affected group rooms.
    async fn announce_presence(&self, change: PresenceChange, rooms: &[RoomId]) {
        debug!(user_id = %change.user_id, state = %change.state, "presence change");
        let _ = self.presence_tx.send(change.clone());
        let event = ServerEvent::presence_update(&change.user_id, change.state);
        let frame = match serde_json::to_string(&event) {
            Ok(json) => Arc::new(json),
            Err(_) => return,
        };
        let reg = self.registry.read().await;
        for room in rooms {
            if let Some(members) = reg.rooms.get(room) {
                for conn_id in members {
                    if let Some(conn) = reg.connections.get(conn_id) {
                        let _ = conn.send(Arc::clone(&frame));
                    }
                }
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
