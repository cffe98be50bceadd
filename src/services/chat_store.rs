use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{Conversation, Message, Sender};

/// Durable record of conversations and their message logs.
///
/// The persistence collaborator seam: the router only depends on this trait,
/// so the Postgres implementation and the in-memory one are interchangeable.
#[async_trait]
pub trait ChatSessionStore: Send + Sync {
    async fn find_active_by_email(&self, email: &str) -> AppResult<Option<Conversation>>;

    /// Atomic find-or-create keyed on `(email, is_active)`.
    ///
    /// If an active conversation exists for the email, the message is
    /// appended to it; otherwise a new conversation is created and seeded
    /// with the message. Returns the conversation and whether it existed
    /// before the call. Two concurrent calls for the same email converge on
    /// a single active conversation.
    async fn open(&self, email: &str, name: &str, first_message: &str)
        -> AppResult<(Conversation, bool)>;

    /// Create a conversation seeded with the customer's first message
    /// (`is_active = true`, `is_read = false`).
    async fn create(&self, email: &str, name: &str, first_message: &str)
        -> AppResult<Conversation>;

    /// Append a message and return the updated conversation; the last log
    /// entry is the newly appended message.
    ///
    /// A staff append acknowledges the thread (`is_read = true`); a customer
    /// append flags it unread. Appending to a closed conversation fails with
    /// `StateConflict` unless the sender is `system`.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender: Sender,
    ) -> AppResult<Conversation>;

    /// Idempotent: marking an already-read conversation is not an error.
    async fn mark_read(&self, conversation_id: Uuid) -> AppResult<()>;

    /// Terminal for the conversation lifecycle; never hard-deletes.
    async fn close(&self, conversation_id: Uuid) -> AppResult<()>;

    async fn list_active(&self) -> AppResult<Vec<Conversation>>;

    async fn get(&self, conversation_id: Uuid) -> AppResult<Conversation>;
}

pub struct PgChatSessionStore {
    pool: Pool,
}

const CONVERSATION_COLUMNS: &str =
    "id, customer_email, customer_name, is_active, is_read, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, content, sender, sequence_number, created_at";

impl PgChatSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn conversation_from_row(row: &Row, messages: Vec<Message>) -> Conversation {
        Conversation {
            id: row.get("id"),
            customer_email: row.get("customer_email"),
            customer_name: row.get("customer_name"),
            messages,
            is_active: row.get("is_active"),
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn message_from_row(row: &Row) -> Message {
        Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            content: row.get("content"),
            sender: row.get("sender"),
            sequence_number: row.get("sequence_number"),
            created_at: row.get("created_at"),
        }
    }

    async fn load_messages(
        &self,
        client: &deadpool_postgres::Client,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 \
                     ORDER BY sequence_number ASC"
                ),
                &[&conversation_id],
            )
            .await?;

        Ok(rows.iter().map(Self::message_from_row).collect())
    }
}

#[async_trait]
impl ChatSessionStore for PgChatSessionStore {
    async fn find_active_by_email(&self, email: &str) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE customer_email = $1 AND is_active"
                ),
                &[&email],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let conversation_id: Uuid = row.get("id");
        let messages = self.load_messages(&client, conversation_id).await?;
        Ok(Some(Self::conversation_from_row(&row, messages)))
    }

    async fn open(
        &self,
        email: &str,
        name: &str,
        first_message: &str,
    ) -> AppResult<(Conversation, bool)> {
        // The partial unique index on (customer_email) WHERE is_active makes
        // this a race-free upsert: losers of a concurrent insert fall through
        // to the winner's row and append there instead.
        for _ in 0..2 {
            let inserted = {
                let client = self.pool.get().await?;
                client
                    .query_opt(
                        "INSERT INTO conversations (id, customer_email, customer_name, is_active, is_read) \
                         VALUES ($1, $2, $3, TRUE, FALSE) \
                         ON CONFLICT (customer_email) WHERE is_active DO NOTHING \
                         RETURNING id",
                        &[&Uuid::new_v4(), &email, &name],
                    )
                    .await?
            };

            if let Some(row) = inserted {
                let id: Uuid = row.get(0);
                let conversation = self.append_message(id, first_message, Sender::Customer).await?;
                return Ok((conversation, false));
            }

            if let Some(existing) = self.find_active_by_email(email).await? {
                let conversation = self
                    .append_message(existing.id, first_message, Sender::Customer)
                    .await?;
                return Ok((conversation, true));
            }

            // The active conversation closed between insert and lookup; retry.
        }

        Err(AppError::Storage(
            "conversation open retry budget exhausted".to_string(),
        ))
    }

    async fn create(&self, email: &str, name: &str, first_message: &str) -> AppResult<Conversation> {
        let id = Uuid::new_v4();
        {
            let client = self.pool.get().await?;
            client
                .execute(
                    "INSERT INTO conversations (id, customer_email, customer_name, is_active, is_read) \
                     VALUES ($1, $2, $3, TRUE, FALSE)",
                    &[&id, &email, &name],
                )
                .await?;
        }

        self.append_message(id, first_message, Sender::Customer).await
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender: Sender,
    ) -> AppResult<Conversation> {
        let message_id = Uuid::new_v4();

        {
            let mut client = self.pool.get().await?;
            let tx = client.transaction().await?;

            let row = tx
                .query_opt(
                    "SELECT is_active FROM conversations WHERE id = $1 FOR UPDATE",
                    &[&conversation_id],
                )
                .await?;

            let Some(row) = row else {
                return Err(AppError::NotFound("conversation"));
            };

            let is_active: bool = row.get(0);
            if !is_active && sender != Sender::System {
                return Err(AppError::StateConflict("conversation is closed"));
            }

            tx.query_one(
                r#"
                WITH next AS (
                    INSERT INTO conversation_counters (conversation_id, last_seq)
                    VALUES ($2, 1)
                    ON CONFLICT (conversation_id)
                    DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                    RETURNING last_seq
                )
                INSERT INTO messages (
                    id,
                    conversation_id,
                    content,
                    sender,
                    sequence_number
                )
                SELECT
                    $1,
                    $2,
                    $3,
                    $4,
                    next.last_seq
                FROM next
                RETURNING id
                "#,
                &[&message_id, &conversation_id, &content, &sender],
            )
            .await?;

            // Staff replies implicitly acknowledge the thread; customer
            // messages flag it unread again. System entries change neither.
            match sender {
                Sender::Staff => {
                    tx.execute(
                        "UPDATE conversations SET is_read = TRUE, updated_at = NOW() WHERE id = $1",
                        &[&conversation_id],
                    )
                    .await?;
                }
                Sender::Customer => {
                    tx.execute(
                        "UPDATE conversations SET is_read = FALSE, updated_at = NOW() WHERE id = $1",
                        &[&conversation_id],
                    )
                    .await?;
                }
                Sender::System => {
                    tx.execute(
                        "UPDATE conversations SET updated_at = NOW() WHERE id = $1",
                        &[&conversation_id],
                    )
                    .await?;
                }
            }

            tx.commit().await?;
        }

        self.get(conversation_id).await
    }

    async fn mark_read(&self, conversation_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET is_read = TRUE, updated_at = NOW() WHERE id = $1",
                &[&conversation_id],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn close(&self, conversation_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
                &[&conversation_id],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn list_active(&self) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE is_active \
                     ORDER BY updated_at DESC"
                ),
                &[],
            )
            .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        let message_rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = ANY($1) \
                     ORDER BY conversation_id, sequence_number ASC"
                ),
                &[&ids],
            )
            .await?;

        let mut messages_map: HashMap<Uuid, Vec<Message>> = HashMap::new();
        for row in &message_rows {
            let message = Self::message_from_row(row);
            messages_map
                .entry(message.conversation_id)
                .or_default()
                .push(message);
        }

        Ok(rows
            .iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                Self::conversation_from_row(row, messages_map.remove(&id).unwrap_or_default())
            })
            .collect())
    }

    async fn get(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"),
                &[&conversation_id],
            )
            .await?
            .ok_or(AppError::NotFound("conversation"))?;

        let messages = self.load_messages(&client, conversation_id).await?;
        Ok(Self::conversation_from_row(&row, messages))
    }
}
