use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::conversation::{Conversation, Message, Sender};
use crate::models::notification::Notification;

use super::{ConnectionId, CustomerIdentity};

/// Ephemeral presence status attached to a connection's participation in a
/// conversation. Event-driven only; there is no heartbeat expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
}

/// Inbound events from client to server
///
/// This is the wire contract; malformed payloads are rejected at the
/// transport boundary before any state mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "initConversation", rename_all = "camelCase")]
    InitConversation {
        email: String,
        name: String,
        message: String,
    },

    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        conversation_id: Uuid,
        message: String,
        sender: Sender,
    },

    #[serde(rename = "joinConversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: Uuid },

    #[serde(rename = "leaveConversation", rename_all = "camelCase")]
    LeaveConversation { conversation_id: Uuid },

    #[serde(rename = "joinStaffRoom")]
    JoinStaffRoom,

    #[serde(rename = "markRead", rename_all = "camelCase")]
    MarkRead { conversation_id: Uuid },

    #[serde(rename = "closeConversation", rename_all = "camelCase")]
    CloseConversation { conversation_id: Uuid },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
        #[serde(default)]
        identity: Option<String>,
    },

    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        conversation_id: Uuid,
        status: PresenceStatus,
    },

    #[serde(rename = "getHistory", rename_all = "camelCase")]
    GetHistory {
        conversation_id: Uuid,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },

    #[serde(rename = "getOnlineConnections", rename_all = "camelCase")]
    GetOnlineConnections { conversation_id: Uuid },
}

impl WsInboundEvent {
    /// Wire name of the event, echoed in acknowledgements.
    pub fn name(&self) -> &'static str {
        match self {
            WsInboundEvent::InitConversation { .. } => "initConversation",
            WsInboundEvent::SendMessage { .. } => "sendMessage",
            WsInboundEvent::JoinConversation { .. } => "joinConversation",
            WsInboundEvent::LeaveConversation { .. } => "leaveConversation",
            WsInboundEvent::JoinStaffRoom => "joinStaffRoom",
            WsInboundEvent::MarkRead { .. } => "markRead",
            WsInboundEvent::CloseConversation { .. } => "closeConversation",
            WsInboundEvent::Typing { .. } => "typing",
            WsInboundEvent::Presence { .. } => "presence",
            WsInboundEvent::GetHistory { .. } => "getHistory",
            WsInboundEvent::GetOnlineConnections { .. } => "getOnlineConnections",
        }
    }
}

/// Outbound events from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    /// Per-request acknowledgement. On failure `success` is false and
    /// `error` carries a human-readable message; no other client observes
    /// anything for a failed operation.
    #[serde(rename = "ack", rename_all = "camelCase")]
    Ack {
        event: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(flatten)]
        data: Map<String, Value>,
    },

    #[serde(rename = "newConversation", rename_all = "camelCase")]
    NewConversation { conversation: Conversation },

    #[serde(rename = "newConversationMessage", rename_all = "camelCase")]
    NewConversationMessage {
        conversation_id: Uuid,
        message: Message,
    },

    #[serde(rename = "newMessage", rename_all = "camelCase")]
    NewMessage {
        conversation_id: Uuid,
        message: Message,
    },

    #[serde(rename = "conversationRead", rename_all = "camelCase")]
    ConversationRead { conversation_id: Uuid },

    #[serde(rename = "conversationClosed", rename_all = "camelCase")]
    ConversationClosed { conversation_id: Uuid },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },

    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        conversation_id: Uuid,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<CustomerIdentity>,
    },

    #[serde(rename = "newNotification", rename_all = "camelCase")]
    NewNotification { notification: Notification },

    #[serde(rename = "notificationCount", rename_all = "camelCase")]
    NotificationCount { count: i64 },
}

impl WsOutboundEvent {
    /// Success acknowledgement with the given payload object flattened in.
    pub fn ack_ok(event: &str, data: Value) -> Self {
        let data = data.as_object().cloned().unwrap_or_default();
        WsOutboundEvent::Ack {
            event: event.to_string(),
            success: true,
            error: None,
            data,
        }
    }

    pub fn ack_failure(event: &str, error: String) -> Self {
        WsOutboundEvent::Ack {
            event: event.to_string(),
            success: false,
            error: Some(error),
            data: Map::new(),
        }
    }

    pub fn new_conversation(conversation: Conversation) -> Self {
        WsOutboundEvent::NewConversation { conversation }
    }

    pub fn new_conversation_message(conversation_id: Uuid, message: Message) -> Self {
        WsOutboundEvent::NewConversationMessage {
            conversation_id,
            message,
        }
    }

    pub fn new_message(conversation_id: Uuid, message: Message) -> Self {
        WsOutboundEvent::NewMessage {
            conversation_id,
            message,
        }
    }

    pub fn conversation_read(conversation_id: Uuid) -> Self {
        WsOutboundEvent::ConversationRead { conversation_id }
    }

    pub fn conversation_closed(conversation_id: Uuid) -> Self {
        WsOutboundEvent::ConversationClosed { conversation_id }
    }

    pub fn typing(conversation_id: Uuid, is_typing: bool, identity: Option<String>) -> Self {
        WsOutboundEvent::Typing {
            conversation_id,
            is_typing,
            identity,
        }
    }

    pub fn presence(
        conversation_id: Uuid,
        status: PresenceStatus,
        identity: Option<CustomerIdentity>,
    ) -> Self {
        WsOutboundEvent::Presence {
            conversation_id,
            status,
            identity,
        }
    }

    pub fn new_notification(notification: Notification) -> Self {
        WsOutboundEvent::NewNotification { notification }
    }

    pub fn notification_count(count: i64) -> Self {
        WsOutboundEvent::NotificationCount { count }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Acknowledgement payloads for the request/response half of the protocol.

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConversationAck {
    pub conversation_id: Uuid,
    pub messages: Vec<Message>,
    pub is_existing_conversation: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageAck {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinedAck {
    pub joined: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeftAck {
    pub left: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkAck {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryAck {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineConnection {
    pub connection_id: ConnectionId,
    pub identity: Option<CustomerIdentity>,
    pub is_admin: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineConnectionsAck {
    pub connections: Vec<OnlineConnection>,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_event_parses_camel_case() {
        let event: WsInboundEvent = serde_json::from_str(
            r#"{"type":"initConversation","email":"a@x.com","name":"Alice","message":"hi"}"#,
        )
        .unwrap();

        match event {
            WsInboundEvent::InitConversation { email, name, message } => {
                assert_eq!(email, "a@x.com");
                assert_eq!(name, "Alice");
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_typing_event_defaults_optional_identity() {
        let event: WsInboundEvent = serde_json::from_str(&format!(
            r#"{{"type":"typing","conversationId":"{}","isTyping":true}}"#,
            Uuid::new_v4()
        ))
        .unwrap();

        assert!(matches!(
            event,
            WsInboundEvent::Typing { identity: None, is_typing: true, .. }
        ));
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<WsInboundEvent>(r#"{"type":"dropTables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_ok_flattens_payload() {
        let ack = WsOutboundEvent::ack_ok("joinConversation", serde_json::json!({"joined": true}));
        let json = serde_json::to_value(&ack).unwrap();

        assert_eq!(json["type"], "ack");
        assert_eq!(json["event"], "joinConversation");
        assert_eq!(json["success"], true);
        assert_eq!(json["joined"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_ack_failure_shape() {
        let ack = WsOutboundEvent::ack_failure("sendMessage", "conversation not found".to_string());
        let json = serde_json::to_value(&ack).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "conversation not found");
    }

    #[test]
    fn test_outbound_event_wire_names() {
        let json =
            serde_json::to_value(WsOutboundEvent::conversation_read(Uuid::new_v4())).unwrap();
        assert_eq!(json["type"], "conversationRead");
        assert!(json.get("conversationId").is_some());

        let json = serde_json::to_value(WsOutboundEvent::typing(Uuid::new_v4(), false, None)).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["isTyping"], false);
    }
}
