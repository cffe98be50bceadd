//! In-memory store implementations
//!
//! Used when the service runs without `DATABASE_URL` (local development) and
//! as the fixture for integration tests. Single lock per store; `open` is
//! atomic by construction, matching the partial-unique-index guarantee of the
//! Postgres implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{Conversation, Message, Sender};
use crate::models::notification::Notification;

use super::chat_store::ChatSessionStore;
use super::notification_store::NotificationStore;

#[derive(Default)]
struct ChatState {
    conversations: HashMap<Uuid, Conversation>,
    sequences: HashMap<Uuid, i64>,
}

impl ChatState {
    fn append(
        &mut self,
        conversation_id: Uuid,
        content: &str,
        sender: Sender,
    ) -> AppResult<Conversation> {
        let Some(conversation) = self.conversations.get(&conversation_id) else {
            return Err(AppError::NotFound("conversation"));
        };
        if !conversation.is_active && sender != Sender::System {
            return Err(AppError::StateConflict("conversation is closed"));
        }

        let seq = {
            let counter = self.sequences.entry(conversation_id).or_insert(0);
            *counter += 1;
            *counter
        };

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            content: content.to_string(),
            sender,
            sequence_number: seq,
            created_at: now,
        };

        let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
            return Err(AppError::NotFound("conversation"));
        };
        conversation.messages.push(message);
        match sender {
            Sender::Staff => conversation.is_read = true,
            Sender::Customer => conversation.is_read = false,
            Sender::System => {}
        }
        conversation.updated_at = now;

        Ok(conversation.clone())
    }

    fn insert_conversation(&mut self, email: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conversations.insert(
            id,
            Conversation {
                id,
                customer_email: email.to_string(),
                customer_name: name.to_string(),
                messages: Vec::new(),
                is_active: true,
                is_read: false,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn find_active_by_email(&self, email: &str) -> Option<&Conversation> {
        self.conversations
            .values()
            .find(|c| c.is_active && c.customer_email == email)
    }
}

#[derive(Default, Clone)]
pub struct MemoryChatStore {
    inner: Arc<Mutex<ChatState>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatSessionStore for MemoryChatStore {
    async fn find_active_by_email(&self, email: &str) -> AppResult<Option<Conversation>> {
        let state = self.inner.lock().await;
        Ok(state.find_active_by_email(email).cloned())
    }

    async fn open(
        &self,
        email: &str,
        name: &str,
        first_message: &str,
    ) -> AppResult<(Conversation, bool)> {
        let mut state = self.inner.lock().await;

        if let Some(existing) = state.find_active_by_email(email) {
            let id = existing.id;
            let conversation = state.append(id, first_message, Sender::Customer)?;
            return Ok((conversation, true));
        }

        let id = state.insert_conversation(email, name);
        let conversation = state.append(id, first_message, Sender::Customer)?;
        Ok((conversation, false))
    }

    async fn create(&self, email: &str, name: &str, first_message: &str) -> AppResult<Conversation> {
        let mut state = self.inner.lock().await;
        let id = state.insert_conversation(email, name);
        state.append(id, first_message, Sender::Customer)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender: Sender,
    ) -> AppResult<Conversation> {
        let mut state = self.inner.lock().await;
        state.append(conversation_id, content, sender)
    }

    async fn mark_read(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Err(AppError::NotFound("conversation"));
        };
        conversation.is_read = true;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn close(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Err(AppError::NotFound("conversation"));
        };
        conversation.is_active = false;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active(&self) -> AppResult<Vec<Conversation>> {
        let state = self.inner.lock().await;
        let mut active: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active)
    }

    async fn get(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let state = self.inner.lock().await;
        state
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(AppError::NotFound("conversation"))
    }
}

#[derive(Default, Clone)]
pub struct MemoryNotificationStore {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        kind: &str,
        message: &str,
        data: serde_json::Value,
    ) -> AppResult<Notification> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            message: message.to_string(),
            data,
            is_read: false,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.inner.lock().await;
        state.push(notification.clone());
        Ok(notification)
    }

    async fn list_all(&self) -> AppResult<Vec<Notification>> {
        let state = self.inner.lock().await;
        Ok(state.iter().rev().cloned().collect())
    }

    async fn list_unread(&self) -> AppResult<Vec<Notification>> {
        let state = self.inner.lock().await;
        Ok(state.iter().rev().filter(|n| !n.is_read).cloned().collect())
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let Some(notification) = state.iter_mut().find(|n| n.id == id) else {
            return Err(AppError::NotFound("notification"));
        };
        notification.is_read = true;
        notification.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_all_read(&self) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let now = Utc::now();
        for notification in state.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            notification.updated_at = now;
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let before = state.len();
        state.retain(|n| n.id != id);
        if state.len() == before {
            return Err(AppError::NotFound("notification"));
        }
        Ok(())
    }

    async fn count_unread(&self) -> AppResult<i64> {
        let state = self.inner.lock().await;
        Ok(state.iter().filter(|n| !n.is_read).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_reuses_active_conversation() {
        let store = MemoryChatStore::new();

        let (first, existed) = store.open("a@x.com", "Alice", "hi").await.unwrap();
        assert!(!existed);
        assert_eq!(first.messages.len(), 1);

        let (second, existed) = store.open("a@x.com", "Alice", "hi again").await.unwrap();
        assert!(existed);
        assert_eq!(second.id, first.id);
        assert_eq!(second.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_open_after_close_creates_fresh_conversation() {
        let store = MemoryChatStore::new();

        let (first, _) = store.open("a@x.com", "Alice", "hi").await.unwrap();
        store.close(first.id).await.unwrap();

        let (second, existed) = store.open("a@x.com", "Alice", "back again").await.unwrap();
        assert!(!existed);
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_append_preserves_send_order() {
        let store = MemoryChatStore::new();
        let (conversation, _) = store.open("a@x.com", "Alice", "first").await.unwrap();

        store
            .append_message(conversation.id, "second", Sender::Staff)
            .await
            .unwrap();
        let updated = store
            .append_message(conversation.id, "third", Sender::Customer)
            .await
            .unwrap();

        let contents: Vec<&str> = updated.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);

        let sequences: Vec<i64> = updated.messages.iter().map(|m| m.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_staff_append_acknowledges_customer_append_unreads() {
        let store = MemoryChatStore::new();
        let (conversation, _) = store.open("a@x.com", "Alice", "hi").await.unwrap();
        assert!(!conversation.is_read);

        let after_staff = store
            .append_message(conversation.id, "hello!", Sender::Staff)
            .await
            .unwrap();
        assert!(after_staff.is_read);

        let after_customer = store
            .append_message(conversation.id, "one more thing", Sender::Customer)
            .await
            .unwrap();
        assert!(!after_customer.is_read);
    }

    #[tokio::test]
    async fn test_closed_conversation_rejects_non_system_appends() {
        let store = MemoryChatStore::new();
        let (conversation, _) = store.open("a@x.com", "Alice", "hi").await.unwrap();
        store.close(conversation.id).await.unwrap();

        let denied = store
            .append_message(conversation.id, "too late", Sender::Customer)
            .await;
        assert!(matches!(denied, Err(AppError::StateConflict(_))));

        // System annotations still land, e.g. "conversation closed by staff".
        let allowed = store
            .append_message(conversation.id, "closed by operator", Sender::System)
            .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = MemoryChatStore::new();
        let (conversation, _) = store.open("a@x.com", "Alice", "hi").await.unwrap();

        store.mark_read(conversation.id).await.unwrap();
        store.mark_read(conversation.id).await.unwrap();

        assert!(store.get(conversation.id).await.unwrap().is_read);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let store = MemoryChatStore::new();
        let result = store.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound("conversation"))));
    }

    #[tokio::test]
    async fn test_unread_count_tracks_reads() {
        let store = MemoryNotificationStore::new();

        for i in 0..3 {
            store
                .create("new-message", &format!("message {i}"), serde_json::json!({}))
                .await
                .unwrap();
        }
        assert_eq!(store.count_unread().await.unwrap(), 3);
        assert_eq!(store.list_unread().await.unwrap().len(), 3);

        store.mark_all_read().await.unwrap();
        assert_eq!(store.count_unread().await.unwrap(), 0);
        assert!(store.list_unread().await.unwrap().is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mark_read_single_notification() {
        let store = MemoryNotificationStore::new();
        let notification = store
            .create("new-conversation", "Alice started a conversation", serde_json::json!({}))
            .await
            .unwrap();

        store.mark_read(notification.id).await.unwrap();
        assert_eq!(store.count_unread().await.unwrap(), 0);

        let missing = store.mark_read(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(AppError::NotFound("notification"))));
    }

    #[tokio::test]
    async fn test_remove_notification() {
        let store = MemoryNotificationStore::new();
        let notification = store
            .create("new-message", "ping", serde_json::json!({}))
            .await
            .unwrap();

        store.remove(notification.id).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());

        let missing = store.remove(notification.id).await;
        assert!(matches!(missing, Err(AppError::NotFound("notification"))));
    }
}
