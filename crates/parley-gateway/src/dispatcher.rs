use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{PresenceState, UserStatus};

/// What one connection announced about its user.
#[derive(Debug, Clone)]
struct PresenceEntry {
    user_id: Uuid,
    username: String,
    status: UserStatus,
    last_seen: DateTime<Utc>,
}

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. Every connection receives every
    /// event and filters channel-scoped ones against its own subscriptions.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Presence keyed by connection: conn_id -> entry
    presence: RwLock<HashMap<Uuid, PresenceEntry>>,

    /// Per-user targeted send channels: user_id -> (conn_id -> sender)
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        // No receivers just means nobody is connected.
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a targeted channel for one connection. Returns (conn_id, receiver).
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to every connection of a user.
    /// Returns how many connections it was handed to.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        let Some(conns) = channels.get(&user_id) else {
            return 0;
        };
        conns
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Track (or re-track) a connection's presence and broadcast the full set.
    pub async fn track(&self, conn_id: Uuid, user_id: Uuid, username: String, status: UserStatus) {
        self.inner.presence.write().await.insert(
            conn_id,
            PresenceEntry {
                user_id,
                username,
                status,
                last_seen: Utc::now(),
            },
        );
        self.broadcast_presence().await;
    }

    /// Stop tracking a connection. Returns false if it was not tracked.
    pub async fn untrack(&self, conn_id: Uuid) -> bool {
        let removed = self.inner.presence.write().await.remove(&conn_id).is_some();
        if removed {
            self.broadcast_presence().await;
        }
        removed
    }

    /// True while any connection of the user is tracked.
    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner
            .presence
            .read()
            .await
            .values()
            .any(|entry| entry.user_id == user_id)
    }

    /// Presence collapsed per user: the "most present" status across the
    /// user's connections wins, and `last_seen` is the latest announcement.
    pub async fn presence_snapshot(&self) -> Vec<PresenceState> {
        let presence = self.inner.presence.read().await;
        let mut by_user: HashMap<Uuid, PresenceState> = HashMap::new();

        for entry in presence.values() {
            by_user
                .entry(entry.user_id)
                .and_modify(|state| {
                    if status_rank(entry.status) > status_rank(state.status) {
                        state.status = entry.status;
                        state.online = entry.status != UserStatus::Offline;
                    }
                    if entry.last_seen > state.last_seen {
                        state.last_seen = entry.last_seen;
                    }
                })
                .or_insert_with(|| PresenceState {
                    user_id: entry.user_id,
                    username: entry.username.clone(),
                    online: entry.status != UserStatus::Offline,
                    status: entry.status,
                    last_seen: entry.last_seen,
                });
        }

        let mut users: Vec<PresenceState> = by_user.into_values().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.cmp(&b.user_id)));
        users
    }

    async fn broadcast_presence(&self) {
        let users = self.presence_snapshot().await;
        self.broadcast(GatewayEvent::PresenceSync { users });
    }
}

fn status_rank(status: UserStatus) -> u8 {
    match status {
        UserStatus::Online => 2,
        UserStatus::Away => 1,
        UserStatus::Offline => 0,
    }
}
