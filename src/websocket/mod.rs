use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod router;

use events::WsOutboundEvent;

/// Unique identifier for a live transport connection
///
/// Assigned when a WebSocket connection registers and used for precise
/// cleanup when the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast group: one room per conversation plus the shared staff room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(Uuid),
    Staff,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conversation:{id}"),
            Room::Staff => write!(f, "staff"),
        }
    }
}

/// Customer identity cached on a connection after `initConversation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    pub email: String,
    pub name: String,
}

/// Per-connection session metadata. Process-local, never persisted; rebuilt
/// from nothing on restart.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub joined_conversation: Option<Uuid>,
    pub identity: Option<CustomerIdentity>,
    pub is_admin: bool,
    pub last_seen: DateTime<Utc>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            joined_conversation: None,
            identity: None,
            is_admin: false,
            last_seen: Utc::now(),
        }
    }
}

struct ConnectionEntry {
    sender: UnboundedSender<String>,
    state: ConnectionState,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

/// Registry of live connections and their room memberships
///
/// Exclusively owned by the broker process; the presence tracker and router
/// hold explicit handles rather than reaching for ambient global state.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection.
    ///
    /// Returns the connection id and the receiver end of its outbound
    /// channel; the transport actor forwards received payloads to the socket.
    pub async fn register(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            ConnectionEntry {
                sender: tx,
                state: ConnectionState::new(),
            },
        );

        tracing::debug!(
            connection_id = %connection_id,
            total = guard.connections.len(),
            "connection registered"
        );

        (connection_id, rx)
    }

    /// Remove a connection and all of its room memberships.
    ///
    /// Returns the final connection state so the caller can run disconnect
    /// cleanup (offline presence for the joined conversation, typing reset).
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionState> {
        let mut guard = self.inner.write().await;
        let entry = guard.connections.remove(&connection_id)?;

        guard.rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });

        tracing::debug!(
            connection_id = %connection_id,
            remaining = guard.connections.len(),
            "connection unregistered"
        );

        Some(entry.state)
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionState> {
        let guard = self.inner.read().await;
        guard.connections.get(&connection_id).map(|e| e.state.clone())
    }

    pub async fn set_joined_conversation(
        &self,
        connection_id: ConnectionId,
        conversation_id: Option<Uuid>,
    ) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&connection_id) {
            entry.state.joined_conversation = conversation_id;
        }
    }

    pub async fn set_identity(&self, connection_id: ConnectionId, identity: CustomerIdentity) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&connection_id) {
            entry.state.identity = Some(identity);
        }
    }

    pub async fn set_admin(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&connection_id) {
            entry.state.is_admin = true;
        }
    }

    /// Refresh `last_seen` for a connection. Called on every inbound frame.
    pub async fn touch(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&connection_id) {
            entry.state.last_seen = Utc::now();
        }
    }

    pub async fn join_room(&self, connection_id: ConnectionId, room: Room) {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&connection_id) {
            return;
        }
        guard.rooms.entry(room).or_default().insert(connection_id);
        tracing::debug!(connection_id = %connection_id, room = %room, "joined room");
    }

    pub async fn leave_room(&self, connection_id: ConnectionId, room: Room) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.rooms.remove(&room);
            }
        }
    }

    /// Connections whose session has the given conversation joined.
    pub async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Vec<(ConnectionId, ConnectionState)> {
        let guard = self.inner.read().await;
        guard
            .connections
            .iter()
            .filter(|(_, entry)| entry.state.joined_conversation == Some(conversation_id))
            .map(|(id, entry)| (*id, entry.state.clone()))
            .collect()
    }

    /// Broadcast an event to every member of a room.
    ///
    /// Send failures (connection mid-close) are ignored; disconnect cleanup
    /// removes the entry shortly after.
    pub async fn broadcast(&self, room: Room, event: &WsOutboundEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, room = %room, "failed to serialize broadcast event");
                return;
            }
        };

        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&room) else {
            return;
        };

        let mut delivered = 0usize;
        for connection_id in members {
            if let Some(entry) = guard.connections.get(connection_id) {
                if entry.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        tracing::debug!(room = %room, delivered, "broadcast event");
    }

    /// Deliver an event to a single connection. Returns false if the
    /// connection is unknown or already closing.
    pub async fn send_to(&self, connection_id: ConnectionId, event: &WsOutboundEvent) -> bool {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, connection_id = %connection_id, "failed to serialize event");
                return false;
            }
        };

        let guard = self.inner.read().await;
        guard
            .connections
            .get(&connection_id)
            .map(|entry| entry.sender.send(payload).is_ok())
            .unwrap_or(false)
    }

    /// Room member count (for debugging/metrics).
    pub async fn room_size(&self, room: Room) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&room).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (connection_id, _rx) = registry.register().await;

        let state = registry.get(connection_id).await.unwrap();
        assert!(!state.is_admin);
        assert!(state.joined_conversation.is_none());

        let removed = registry.unregister(connection_id).await;
        assert!(removed.is_some());
        assert!(registry.get(connection_id).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_members_only() {
        let registry = ConnectionRegistry::new();
        let conversation_id = Uuid::new_v4();

        let (member, mut member_rx) = registry.register().await;
        let (outsider, mut outsider_rx) = registry.register().await;
        registry.join_room(member, Room::Conversation(conversation_id)).await;
        registry.join_room(outsider, Room::Staff).await;

        registry
            .broadcast(
                Room::Conversation(conversation_id),
                &WsOutboundEvent::conversation_read(conversation_id),
            )
            .await;

        assert!(member_rx.try_recv().is_ok());
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_cleans_room_membership() {
        let registry = ConnectionRegistry::new();
        let conversation_id = Uuid::new_v4();

        let (connection_id, _rx) = registry.register().await;
        registry.join_room(connection_id, Room::Conversation(conversation_id)).await;
        assert_eq!(registry.room_size(Room::Conversation(conversation_id)).await, 1);

        registry.unregister(connection_id).await;
        assert_eq!(registry.room_size(Room::Conversation(conversation_id)).await, 0);
    }

    #[tokio::test]
    async fn test_list_by_conversation_filters_on_joined_id() {
        let registry = ConnectionRegistry::new();
        let conversation_id = Uuid::new_v4();

        let (a, _rx_a) = registry.register().await;
        let (b, _rx_b) = registry.register().await;
        let (c, _rx_c) = registry.register().await;

        registry.set_joined_conversation(a, Some(conversation_id)).await;
        registry.set_joined_conversation(b, Some(conversation_id)).await;
        registry.set_joined_conversation(c, Some(Uuid::new_v4())).await;

        let listed = registry.list_by_conversation(conversation_id).await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|(id, _)| *id == a || *id == b));
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_is_false() {
        let registry = ConnectionRegistry::new();
        let delivered = registry
            .send_to(ConnectionId::new(), &WsOutboundEvent::notification_count(0))
            .await;
        assert!(!delivered);
    }
}
