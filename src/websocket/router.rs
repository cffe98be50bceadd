//! Realtime event router
//!
//! Accepts inbound events, drives the chat and notification stores, updates
//! registry and typing state, and fans broadcasts out to the conversation
//! and staff rooms. Every handler runs under a uniform failure boundary: a
//! failing request yields a `{success:false, error}` acknowledgement to the
//! requesting connection and nothing to anyone else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::Sender;
use crate::services::chat_store::ChatSessionStore;
use crate::services::notification_gateway::NotificationGateway;
use crate::services::presence::PresenceTracker;

use super::events::{
    HistoryAck, InitConversationAck, JoinedAck, LeftAck, OkAck, OnlineConnection,
    OnlineConnectionsAck, PresenceStatus, SendMessageAck, WsInboundEvent, WsOutboundEvent,
};
use super::{ConnectionId, ConnectionRegistry, CustomerIdentity, Room};

const HISTORY_PAGE_MAX: usize = 200;
const MAX_MESSAGE_BYTES: usize = 8 * 1024;
const MAX_EMAIL_LEN: usize = 320;
const MAX_NAME_LEN: usize = 120;

pub struct RealtimeRouter {
    chat: Arc<dyn ChatSessionStore>,
    notifications: Arc<NotificationGateway>,
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    storage_timeout: Duration,
    history_page_size: usize,
}

impl RealtimeRouter {
    pub fn new(
        chat: Arc<dyn ChatSessionStore>,
        notifications: Arc<NotificationGateway>,
        registry: ConnectionRegistry,
        presence: PresenceTracker,
        storage_timeout: Duration,
        history_page_size: usize,
    ) -> Self {
        Self {
            chat,
            notifications,
            registry,
            presence,
            storage_timeout,
            history_page_size,
        }
    }

    /// Entry point for one inbound event. Never propagates an error to the
    /// transport; failures become structured acknowledgements.
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: WsInboundEvent,
    ) -> WsOutboundEvent {
        let name = event.name();
        match self.dispatch(connection_id, event).await {
            Ok(data) => WsOutboundEvent::ack_ok(name, data),
            Err(error) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = name,
                    %error,
                    "event handler failed"
                );
                WsOutboundEvent::ack_failure(name, error.to_string())
            }
        }
    }

    /// Disconnect cleanup: drop typing state, remove the registry entry, and
    /// announce the connection offline in its joined conversation.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) {
        self.presence.clear_on_disconnect(connection_id).await;

        let Some(state) = self.registry.unregister(connection_id).await else {
            return;
        };

        if let Some(conversation_id) = state.joined_conversation {
            let event = WsOutboundEvent::presence(
                conversation_id,
                PresenceStatus::Offline,
                state.identity,
            );
            self.registry
                .broadcast(Room::Conversation(conversation_id), &event)
                .await;
            self.registry.broadcast(Room::Staff, &event).await;
        }
    }

    async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: WsInboundEvent,
    ) -> AppResult<Value> {
        match event {
            WsInboundEvent::InitConversation { email, name, message } => {
                self.init_conversation(connection_id, email, name, message).await
            }
            WsInboundEvent::SendMessage {
                conversation_id,
                message,
                sender,
            } => self.send_message(connection_id, conversation_id, message, sender).await,
            WsInboundEvent::JoinConversation { conversation_id } => {
                self.join_conversation(connection_id, conversation_id).await
            }
            WsInboundEvent::LeaveConversation { conversation_id } => {
                self.leave_conversation(connection_id, conversation_id).await
            }
            WsInboundEvent::JoinStaffRoom => self.join_staff_room(connection_id).await,
            WsInboundEvent::MarkRead { conversation_id } => {
                self.mark_read(conversation_id).await
            }
            WsInboundEvent::CloseConversation { conversation_id } => {
                self.close_conversation(conversation_id).await
            }
            WsInboundEvent::Typing {
                conversation_id,
                is_typing,
                identity,
            } => self.typing(connection_id, conversation_id, is_typing, identity).await,
            WsInboundEvent::Presence {
                conversation_id,
                status,
            } => self.presence_update(connection_id, conversation_id, status).await,
            WsInboundEvent::GetHistory {
                conversation_id,
                limit,
                offset,
            } => self.get_history(conversation_id, limit, offset).await,
            WsInboundEvent::GetOnlineConnections { conversation_id } => {
                self.get_online_connections(conversation_id).await
            }
        }
    }

    async fn init_conversation(
        &self,
        connection_id: ConnectionId,
        email: String,
        name: String,
        message: String,
    ) -> AppResult<Value> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') || email.len() > MAX_EMAIL_LEN {
            return Err(AppError::InvalidInput(
                "a valid customer email is required".to_string(),
            ));
        }

        let name = name.trim().to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(AppError::InvalidInput("customer name is required".to_string()));
        }

        validate_content(&message)?;

        let (conversation, existing) = self
            .with_storage(self.chat.open(&email, &name, &message))
            .await?;
        let conversation_id = conversation.id;

        self.registry
            .set_identity(
                connection_id,
                CustomerIdentity {
                    email: email.clone(),
                    name: name.clone(),
                },
            )
            .await;
        self.registry
            .set_joined_conversation(connection_id, Some(conversation_id))
            .await;
        self.registry
            .join_room(connection_id, Room::Conversation(conversation_id))
            .await;

        if existing {
            if let Some(message) = conversation.last_message() {
                self.registry
                    .broadcast(
                        Room::Staff,
                        &WsOutboundEvent::new_conversation_message(
                            conversation_id,
                            message.clone(),
                        ),
                    )
                    .await;
            }
            self.notify_staff(
                "new-message",
                &format!("New message from {name}"),
                json!({ "conversationId": conversation_id }),
            )
            .await;
        } else {
            tracing::info!(
                conversation_id = %conversation_id,
                "conversation opened"
            );
            self.registry
                .broadcast(
                    Room::Staff,
                    &WsOutboundEvent::new_conversation(conversation.clone()),
                )
                .await;
            self.notify_staff(
                "new-conversation",
                &format!("{name} started a conversation"),
                json!({ "conversationId": conversation_id }),
            )
            .await;
        }

        self.presence
            .set_presence(connection_id, conversation_id, PresenceStatus::Online)
            .await;

        ack(InitConversationAck {
            conversation_id,
            messages: conversation.messages,
            is_existing_conversation: existing,
        })
    }

    async fn send_message(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
        message: String,
        sender: Sender,
    ) -> AppResult<Value> {
        validate_content(&message)?;

        let conversation = self
            .with_storage(self.chat.append_message(conversation_id, &message, sender))
            .await?;
        let appended = conversation
            .last_message()
            .cloned()
            .ok_or(AppError::Internal)?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %appended.id,
            sender = sender.as_str(),
            "message appended"
        );

        // The sender stopped composing the moment the message landed.
        self.presence.stop_typing(connection_id).await;

        self.registry
            .broadcast(
                Room::Conversation(conversation_id),
                &WsOutboundEvent::new_message(conversation_id, appended.clone()),
            )
            .await;

        match sender {
            Sender::Staff => {
                self.registry
                    .broadcast(
                        Room::Staff,
                        &WsOutboundEvent::conversation_read(conversation_id),
                    )
                    .await;
            }
            Sender::Customer => {
                self.registry
                    .broadcast(
                        Room::Staff,
                        &WsOutboundEvent::new_message(conversation_id, appended.clone()),
                    )
                    .await;
                self.notify_staff(
                    "new-message",
                    &format!("New message from {}", conversation.customer_name),
                    json!({
                        "conversationId": conversation_id,
                        "messageId": appended.id,
                    }),
                )
                .await;
            }
            Sender::System => {}
        }

        ack(SendMessageAck {
            message_id: appended.id,
        })
    }

    async fn join_conversation(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
    ) -> AppResult<Value> {
        self.registry
            .join_room(connection_id, Room::Conversation(conversation_id))
            .await;
        self.registry
            .set_joined_conversation(connection_id, Some(conversation_id))
            .await;

        ack(JoinedAck { joined: true })
    }

    async fn leave_conversation(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
    ) -> AppResult<Value> {
        self.registry
            .leave_room(connection_id, Room::Conversation(conversation_id))
            .await;
        self.registry
            .set_joined_conversation(connection_id, None)
            .await;
        self.presence
            .set_presence(connection_id, conversation_id, PresenceStatus::Offline)
            .await;

        ack(LeftAck { left: true })
    }

    async fn join_staff_room(&self, connection_id: ConnectionId) -> AppResult<Value> {
        self.registry.join_room(connection_id, Room::Staff).await;
        self.registry.set_admin(connection_id).await;

        // A reconnecting staff client must never see a stale badge.
        if let Err(error) = self.notifications.push_unread_count(connection_id).await {
            tracing::warn!(
                connection_id = %connection_id,
                %error,
                "failed to push unread count on staff join"
            );
        }

        ack(JoinedAck { joined: true })
    }

    async fn mark_read(&self, conversation_id: Uuid) -> AppResult<Value> {
        self.with_storage(self.chat.mark_read(conversation_id)).await?;
        self.registry
            .broadcast(
                Room::Staff,
                &WsOutboundEvent::conversation_read(conversation_id),
            )
            .await;

        ack(OkAck { ok: true })
    }

    async fn close_conversation(&self, conversation_id: Uuid) -> AppResult<Value> {
        self.with_storage(self.chat.close(conversation_id)).await?;
        tracing::info!(conversation_id = %conversation_id, "conversation closed");

        let event = WsOutboundEvent::conversation_closed(conversation_id);
        self.registry
            .broadcast(Room::Conversation(conversation_id), &event)
            .await;
        self.registry.broadcast(Room::Staff, &event).await;

        ack(OkAck { ok: true })
    }

    async fn typing(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
        is_typing: bool,
        identity: Option<String>,
    ) -> AppResult<Value> {
        let state = self.registry.get(connection_id).await;
        let is_admin = state.as_ref().map(|s| s.is_admin).unwrap_or(false);
        let identity = identity.or_else(|| {
            state
                .and_then(|s| s.identity)
                .map(|identity| identity.name)
        });

        if is_typing {
            self.presence
                .start_typing(connection_id, conversation_id, identity, is_admin)
                .await;
        } else {
            self.presence.stop_typing(connection_id).await;
        }

        ack(OkAck { ok: true })
    }

    async fn presence_update(
        &self,
        connection_id: ConnectionId,
        conversation_id: Uuid,
        status: PresenceStatus,
    ) -> AppResult<Value> {
        self.presence
            .set_presence(connection_id, conversation_id, status)
            .await;

        ack(OkAck { ok: true })
    }

    async fn get_history(
        &self,
        conversation_id: Uuid,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AppResult<Value> {
        let limit = limit.unwrap_or(self.history_page_size).min(HISTORY_PAGE_MAX);
        let offset = offset.unwrap_or(0);

        let conversation = self.with_storage(self.chat.get(conversation_id)).await?;
        let total = conversation.messages.len();
        let messages: Vec<_> = conversation
            .messages
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();
        let has_more = offset + messages.len() < total;

        ack(HistoryAck { messages, has_more })
    }

    async fn get_online_connections(&self, conversation_id: Uuid) -> AppResult<Value> {
        let connections: Vec<OnlineConnection> = self
            .registry
            .list_by_conversation(conversation_id)
            .await
            .into_iter()
            .map(|(connection_id, state)| OnlineConnection {
                connection_id,
                identity: state.identity,
                is_admin: state.is_admin,
                last_seen: state.last_seen,
            })
            .collect();
        let count = connections.len();

        ack(OnlineConnectionsAck { connections, count })
    }

    /// Run a storage operation under the request-level timeout. A stalled
    /// persistence collaborator surfaces as `storage unavailable` instead of
    /// wedging the handler.
    async fn with_storage<T, F>(&self, op: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.storage_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StorageUnavailable),
        }
    }

    /// Best-effort notification recording: a failure here is logged and does
    /// not fail the request whose primary mutation already succeeded.
    async fn notify_staff(&self, kind: &str, message: &str, data: Value) {
        if let Err(error) = self.notifications.notify(kind, message, data).await {
            tracing::error!(%error, kind, "failed to record staff notification");
        }
    }
}

fn validate_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "message content cannot be empty".to_string(),
        ));
    }
    if content.len() > MAX_MESSAGE_BYTES {
        return Err(AppError::InvalidInput(
            "message content too large".to_string(),
        ));
    }
    Ok(())
}

fn ack<T: Serialize>(payload: T) -> AppResult<Value> {
    serde_json::to_value(payload).map_err(|_| AppError::Internal)
}
