use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::notification::Notification;

/// Durable record of staff-facing notification events.
///
/// `is_read` only ratchets towards true; a notification cannot be un-read
/// through this store.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, kind: &str, message: &str, data: serde_json::Value)
        -> AppResult<Notification>;

    async fn list_all(&self) -> AppResult<Vec<Notification>>;

    async fn list_unread(&self) -> AppResult<Vec<Notification>>;

    async fn mark_read(&self, id: Uuid) -> AppResult<()>;

    async fn mark_all_read(&self) -> AppResult<()>;

    async fn remove(&self, id: Uuid) -> AppResult<()>;

    async fn count_unread(&self) -> AppResult<i64>;
}

pub struct PgNotificationStore {
    pool: Pool,
}

const NOTIFICATION_COLUMNS: &str = "id, kind, message, data, is_read, created_at, updated_at";

impl PgNotificationStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn from_row(row: &Row) -> Notification {
        Notification {
            id: row.get("id"),
            kind: row.get("kind"),
            message: row.get("message"),
            data: row.get("data"),
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(
        &self,
        kind: &str,
        message: &str,
        data: serde_json::Value,
    ) -> AppResult<Notification> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO notifications (id, kind, message, data, is_read) \
                     VALUES ($1, $2, $3, $4, FALSE) \
                     RETURNING {NOTIFICATION_COLUMNS}"
                ),
                &[&Uuid::new_v4(), &kind, &message, &data],
            )
            .await?;

        Ok(Self::from_row(&row))
    }

    async fn list_all(&self) -> AppResult<Vec<Notification>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY created_at DESC"
                ),
                &[],
            )
            .await?;

        Ok(rows.iter().map(Self::from_row).collect())
    }

    async fn list_unread(&self) -> AppResult<Vec<Notification>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
                     WHERE NOT is_read \
                     ORDER BY created_at DESC"
                ),
                &[],
            )
            .await?;

        Ok(rows.iter().map(Self::from_row).collect())
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE notifications SET is_read = TRUE, updated_at = NOW() WHERE id = $1",
                &[&id],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound("notification"));
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE notifications SET is_read = TRUE, updated_at = NOW() WHERE NOT is_read",
                &[],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM notifications WHERE id = $1", &[&id])
            .await?;

        if deleted == 0 {
            return Err(AppError::NotFound("notification"));
        }
        Ok(())
    }

    async fn count_unread(&self) -> AppResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM notifications WHERE NOT is_read", &[])
            .await?;

        Ok(row.get(0))
    }
}
