use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message. `system` entries are service annotations and are
/// the only sender allowed to append to a closed conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "message_sender")]
pub enum Sender {
    #[postgres(name = "customer")]
    Customer,
    #[postgres(name = "staff")]
    Staff,
    #[postgres(name = "system")]
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Customer => "customer",
            Sender::Staff => "staff",
            Sender::System => "system",
        }
    }
}

/// Immutable once appended; ordering within a conversation follows
/// `sequence_number`, which equals send order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// A customer-to-staff chat thread with an ordered, append-only message log.
/// Never hard-deleted; `close` flips `is_active` off and is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub customer_email: String,
    pub customer_name: String,
    pub messages: Vec<Message>,
    pub is_active: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// The most recently appended message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_wire_names() {
        assert_eq!(serde_json::to_string(&Sender::Customer).unwrap(), "\"customer\"");
        assert_eq!(serde_json::to_string(&Sender::Staff).unwrap(), "\"staff\"");
        let parsed: Sender = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(parsed, Sender::System);
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            content: "hi".to_string(),
            sender: Sender::Customer,
            sequence_number: 1,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("conversationId").is_some());
        assert!(json.get("sequenceNumber").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
