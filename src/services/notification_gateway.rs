use std::sync::Arc;

use serde_json::Value;

use crate::error::AppResult;
use crate::models::notification::Notification;
use crate::websocket::events::WsOutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry, Room};

use super::notification_store::NotificationStore;

/// Fan-out of notification activity to the staff room.
///
/// Every recorded notification is followed by a refreshed unread count so
/// staff clients never derive the badge themselves.
pub struct NotificationGateway {
    store: Arc<dyn NotificationStore>,
    registry: ConnectionRegistry,
}

impl NotificationGateway {
    pub fn new(store: Arc<dyn NotificationStore>, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> Arc<dyn NotificationStore> {
        self.store.clone()
    }

    /// Record a notification and broadcast it to the staff room.
    pub async fn notify(&self, kind: &str, message: &str, data: Value) -> AppResult<Notification> {
        let notification = self.store.create(kind, message, data).await?;
        tracing::debug!(
            notification_id = %notification.id,
            kind,
            "notification recorded"
        );

        self.registry
            .broadcast(
                Room::Staff,
                &WsOutboundEvent::new_notification(notification.clone()),
            )
            .await;

        match self.store.count_unread().await {
            Ok(count) => {
                self.registry
                    .broadcast(Room::Staff, &WsOutboundEvent::notification_count(count))
                    .await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to refresh unread notification count");
            }
        }

        Ok(notification)
    }

    /// Push the current unread count to one connection. Used on staff-room
    /// join so a reconnecting staff client is never stale.
    pub async fn push_unread_count(&self, connection_id: ConnectionId) -> AppResult<()> {
        let count = self.store.count_unread().await?;
        self.registry
            .send_to(connection_id, &WsOutboundEvent::notification_count(count))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryNotificationStore;

    #[tokio::test]
    async fn test_notify_broadcasts_notification_and_count() {
        let registry = ConnectionRegistry::new();
        let gateway = NotificationGateway::new(
            Arc::new(MemoryNotificationStore::new()),
            registry.clone(),
        );

        let (staff, mut staff_rx) = registry.register().await;
        registry.join_room(staff, Room::Staff).await;

        gateway
            .notify(
                "new-message",
                "New message from Alice",
                serde_json::json!({"conversationId": uuid::Uuid::new_v4()}),
            )
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_str(&staff_rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "newNotification");
        assert_eq!(first["notification"]["kind"], "new-message");
        assert_eq!(first["notification"]["isRead"], false);

        let second: serde_json::Value =
            serde_json::from_str(&staff_rx.try_recv().unwrap()).unwrap();
        assert_eq!(second["type"], "notificationCount");
        assert_eq!(second["count"], 1);
    }

    #[tokio::test]
    async fn test_push_unread_count_targets_one_connection() {
        let registry = ConnectionRegistry::new();
        let store = Arc::new(MemoryNotificationStore::new());
        let gateway = NotificationGateway::new(store.clone(), registry.clone());

        store
            .create("new-conversation", "Bob started a conversation", serde_json::json!({}))
            .await
            .unwrap();

        let (joining, mut joining_rx) = registry.register().await;
        let (other, mut other_rx) = registry.register().await;
        registry.join_room(joining, Room::Staff).await;
        registry.join_room(other, Room::Staff).await;

        gateway.push_unread_count(joining).await.unwrap();

        let event: serde_json::Value =
            serde_json::from_str(&joining_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event["type"], "notificationCount");
        assert_eq!(event["count"], 1);
        assert!(other_rx.try_recv().is_err());
    }
}
