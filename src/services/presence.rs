//! Presence and typing tracking
//!
//! Typing state is debounced: a start arms an expiry timer, a renewed start
//! resets it, and an explicit stop or the timer firing (whichever comes
//! first) cancels the other. Presence is event-driven only; there is no
//! heartbeat expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::websocket::events::{PresenceStatus, WsOutboundEvent};
use crate::websocket::{ConnectionId, ConnectionRegistry, Room};

/// Window after which an unrenewed typing-start is treated as stopped.
pub const TYPING_TTL: Duration = Duration::from_millis(3000);

struct TypingEntry {
    conversation_id: Uuid,
    identity: Option<String>,
    is_admin: bool,
    generation: u64,
    expiry: JoinHandle<()>,
}

/// Tracks per-connection typing state with timeout-based expiry.
///
/// Holds an explicit registry handle for broadcasts; the typing map is owned
/// here and mutated only through these methods.
#[derive(Clone)]
pub struct PresenceTracker {
    typing: Arc<Mutex<HashMap<ConnectionId, TypingEntry>>>,
    registry: ConnectionRegistry,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub fn new(registry: ConnectionRegistry, ttl: Duration) -> Self {
        Self {
            typing: Arc::new(Mutex::new(HashMap::new())),
            registry,
            ttl,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Transition a connection into TYPING, resetting any armed timer.
    pub async fn start_typing(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
        identity: Option<String>,
        is_admin: bool,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let tracker = self.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(tracker.ttl).await;
            tracker.expire(connection_id, generation).await;
        });

        {
            let mut typing = self.typing.lock().await;
            if let Some(previous) = typing.insert(
                connection_id,
                TypingEntry {
                    conversation_id,
                    identity: identity.clone(),
                    is_admin,
                    generation,
                    expiry,
                },
            ) {
                previous.expiry.abort();
            }
        }

        self.broadcast_typing(conversation_id, true, identity, is_admin)
            .await;
    }

    /// Explicit stop: cancels the pending timer and announces NOT_TYPING.
    pub async fn stop_typing(&self, connection_id: ConnectionId) {
        let entry = {
            let mut typing = self.typing.lock().await;
            typing.remove(&connection_id)
        };

        if let Some(entry) = entry {
            entry.expiry.abort();
            self.broadcast_typing(
                entry.conversation_id,
                false,
                entry.identity,
                entry.is_admin,
            )
            .await;
        }
    }

    /// Disconnect cleanup. Same NOT_TYPING transition as an explicit stop.
    pub async fn clear_on_disconnect(&self, connection_id: ConnectionId) {
        self.stop_typing(connection_id).await;
    }

    /// Broadcast a presence status for the connection's participation in a
    /// conversation, carrying the cached identity when known.
    pub async fn set_presence(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
        status: PresenceStatus,
    ) {
        let identity = self
            .registry
            .get(connection_id)
            .await
            .and_then(|state| state.identity);

        let event = WsOutboundEvent::presence(conversation_id, status, identity);
        self.registry
            .broadcast(Room::Conversation(conversation_id), &event)
            .await;
        self.registry.broadcast(Room::Staff, &event).await;
    }

    /// Timer callback. The generation guard makes a timer that lost a
    /// debounce race a no-op.
    async fn expire(&self, connection_id: ConnectionId, generation: u64) {
        let entry = {
            let mut typing = self.typing.lock().await;
            match typing.get(&connection_id) {
                Some(entry) if entry.generation == generation => typing.remove(&connection_id),
                _ => None,
            }
        };

        if let Some(entry) = entry {
            tracing::debug!(
                connection_id = %connection_id,
                conversation_id = %entry.conversation_id,
                "typing expired without stop"
            );
            self.broadcast_typing(
                entry.conversation_id,
                false,
                entry.identity,
                entry.is_admin,
            )
            .await;
        }
    }

    async fn broadcast_typing(
        &self,
        conversation_id: Uuid,
        is_typing: bool,
        identity: Option<String>,
        is_admin: bool,
    ) {
        let event = WsOutboundEvent::typing(conversation_id, is_typing, identity);
        self.registry
            .broadcast(Room::Conversation(conversation_id), &event)
            .await;
        // Staff watch customer typing from the shared room; their own typing
        // stays inside the conversation.
        if !is_admin {
            self.registry.broadcast(Room::Staff, &event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(text) = rx.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                events.push(value);
            }
        }
        events
    }

    async fn setup() -> (PresenceTracker, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let tracker = PresenceTracker::new(registry.clone(), TYPING_TTL);
        (tracker, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_after_ttl() {
        let (tracker, registry) = setup().await;
        let conversation_id = Uuid::new_v4();

        let (typist, _typist_rx) = registry.register().await;
        let (observer, mut observer_rx) = registry.register().await;
        registry.join_room(observer, Room::Conversation(conversation_id)).await;

        tracker
            .start_typing(typist, conversation_id, Some("Alice".to_string()), false)
            .await;

        let started = drain(&mut observer_rx);
        assert!(started.iter().any(|e| e["type"] == "typing" && e["isTyping"] == true));

        tokio::time::sleep(Duration::from_millis(3100)).await;

        let expired = drain(&mut observer_rx);
        assert!(
            expired.iter().any(|e| e["type"] == "typing" && e["isTyping"] == false),
            "expected synthetic typing stop after expiry, got {expired:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewed_start_resets_the_timer() {
        let (tracker, registry) = setup().await;
        let conversation_id = Uuid::new_v4();

        let (typist, _typist_rx) = registry.register().await;
        let (observer, mut observer_rx) = registry.register().await;
        registry.join_room(observer, Room::Conversation(conversation_id)).await;

        tracker.start_typing(typist, conversation_id, None, false).await;
        tokio::time::sleep(Duration::from_millis(2000)).await;

        tracker.start_typing(typist, conversation_id, None, false).await;
        tokio::time::sleep(Duration::from_millis(2000)).await;

        // 4s since the first start, 2s since the renewal: still typing.
        let events = drain(&mut observer_rx);
        assert!(
            !events.iter().any(|e| e["type"] == "typing" && e["isTyping"] == false),
            "debounced renewal must not emit a stop, got {events:?}"
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let events = drain(&mut observer_rx);
        assert!(events.iter().any(|e| e["type"] == "typing" && e["isTyping"] == false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_cancels_the_timer() {
        let (tracker, registry) = setup().await;
        let conversation_id = Uuid::new_v4();

        let (typist, _typist_rx) = registry.register().await;
        let (observer, mut observer_rx) = registry.register().await;
        registry.join_room(observer, Room::Conversation(conversation_id)).await;

        tracker.start_typing(typist, conversation_id, None, false).await;
        tracker.stop_typing(typist).await;

        let events = drain(&mut observer_rx);
        let stops = events
            .iter()
            .filter(|e| e["type"] == "typing" && e["isTyping"] == false)
            .count();
        assert_eq!(stops, 1);

        // The aborted timer must not produce a second stop.
        tokio::time::sleep(Duration::from_millis(3200)).await;
        let events = drain(&mut observer_rx);
        assert!(events.is_empty(), "cancelled timer fired anyway: {events:?}");
    }

    #[tokio::test]
    async fn test_staff_typing_stays_out_of_staff_room() {
        let (tracker, registry) = setup().await;
        let conversation_id = Uuid::new_v4();

        let (staff_typist, _rx) = registry.register().await;
        let (other_staff, mut staff_rx) = registry.register().await;
        registry.join_room(other_staff, Room::Staff).await;

        tracker.start_typing(staff_typist, conversation_id, None, true).await;

        assert!(staff_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_presence_reaches_conversation_and_staff_rooms() {
        let (tracker, registry) = setup().await;
        let conversation_id = Uuid::new_v4();

        let (subject, _subject_rx) = registry.register().await;
        let (watcher, mut watcher_rx) = registry.register().await;
        let (staff, mut staff_rx) = registry.register().await;
        registry.join_room(watcher, Room::Conversation(conversation_id)).await;
        registry.join_room(staff, Room::Staff).await;

        tracker
            .set_presence(subject, conversation_id, PresenceStatus::Away)
            .await;

        for rx in [&mut watcher_rx, &mut staff_rx] {
            let events = drain(rx);
            assert!(events.iter().any(|e| e["type"] == "presence" && e["status"] == "away"));
        }
    }
}
