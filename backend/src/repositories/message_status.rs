//! Message status repository trait for dependency injection and testing.
//!
//! Writes are guarded in SQL so a status can only move forward, whatever
//! order acknowledgements arrive in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::message_status::{DeliveryStatus, MessageStatusRecord, MessageStatusRow};
use crate::types::{MessageId, UserId};

const SELECT_COLUMNS: &str = "message_id, user_id, status, delivered_at, read_at";

/// Ranks the stored text status inside SQL so guards compare levels, not strings.
const STATUS_RANK_SQL: &str =
    "CASE message_status.status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END";

/// Repository trait for message status rows.
///
/// Use `MockMessageStatusRepositoryTrait` in tests to mock the behavior.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStatusRepositoryTrait: Send + Sync {
    /// Seeds `sent` rows, leaving existing rows untouched.
    async fn insert_initial(
        &self,
        message_id: MessageId,
        recipients: &[UserId],
    ) -> Result<u64, AppError>;

    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<MessageStatusRecord>, AppError>;

    /// Writes `status` only if it is above the stored level. Returns `None`
    /// when the guard rejected the write.
    async fn advance(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<MessageStatusRecord>, AppError>;

    async fn list_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<MessageStatusRecord>, AppError>;

    /// Moves the user's rows for `message_ids` up to `status`, inserting rows
    /// that were never seeded. Rows already at or above `status` are skipped.
    async fn advance_unread(
        &self,
        user_id: UserId,
        message_ids: &[MessageId],
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageStatusRecord>, AppError>;
}

#[derive(Debug, Clone)]
pub struct MessageStatusRepository {
    pool: PgPool,
}

impl MessageStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_record(row: MessageStatusRow) -> Result<MessageStatusRecord, AppError> {
    MessageStatusRecord::try_from(row).map_err(|e| AppError::InternalServerError(e.into()))
}

fn into_records(rows: Vec<MessageStatusRow>) -> Result<Vec<MessageStatusRecord>, AppError> {
    rows.into_iter().map(into_record).collect()
}

fn timestamp_columns(status: DeliveryStatus) -> (bool, bool) {
    match status {
        DeliveryStatus::Sent => (false, false),
        DeliveryStatus::Delivered => (true, false),
        DeliveryStatus::Read => (true, true),
    }
}

#[async_trait]
impl MessageStatusRepositoryTrait for MessageStatusRepository {
    async fn insert_initial(
        &self,
        message_id: MessageId,
        recipients: &[UserId],
    ) -> Result<u64, AppError> {
        if recipients.is_empty() {
            return Ok(0);
        }
        let user_ids: Vec<String> = recipients.iter().map(|id| id.to_string()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO message_status (message_id, user_id, status, updated_at)
            SELECT $1, recipient, 'sent', NOW()
            FROM UNNEST($2::TEXT[]) AS recipient
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(&user_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<MessageStatusRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM message_status WHERE message_id = $1 AND user_id = $2",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, MessageStatusRow>(&query)
            .bind(message_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_record).transpose()
    }

    async fn advance(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<MessageStatusRecord>, AppError> {
        let (stamp_delivered, stamp_read) = timestamp_columns(status);
        let query = format!(
            r#"
            INSERT INTO message_status (message_id, user_id, status, delivered_at, read_at, updated_at)
            VALUES ($1, $2, $3,
                    CASE WHEN $5 THEN $4 END,
                    CASE WHEN $6 THEN $4 END,
                    $4)
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = EXCLUDED.status,
                delivered_at = COALESCE(message_status.delivered_at, EXCLUDED.delivered_at),
                read_at = COALESCE(message_status.read_at, EXCLUDED.read_at),
                updated_at = EXCLUDED.updated_at
            WHERE {} < $7
            RETURNING {}
            "#,
            STATUS_RANK_SQL, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, MessageStatusRow>(&query)
            .bind(message_id)
            .bind(user_id)
            .bind(status.as_str())
            .bind(at)
            .bind(stamp_delivered)
            .bind(stamp_read)
            .bind(status.rank())
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_record).transpose()
    }

    async fn list_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<MessageStatusRecord>, AppError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
        let query = format!(
            "SELECT {} FROM message_status WHERE message_id = ANY($1) ORDER BY message_id, user_id",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageStatusRow>(&query)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn advance_unread(
        &self,
        user_id: UserId,
        message_ids: &[MessageId],
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageStatusRecord>, AppError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let (stamp_delivered, stamp_read) = timestamp_columns(status);
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
        let query = format!(
            r#"
            INSERT INTO message_status (message_id, user_id, status, delivered_at, read_at, updated_at)
            SELECT message, $1, $3,
                   CASE WHEN $5 THEN $4 END,
                   CASE WHEN $6 THEN $4 END,
                   $4
            FROM UNNEST($2::TEXT[]) AS message
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = EXCLUDED.status,
                delivered_at = COALESCE(message_status.delivered_at, EXCLUDED.delivered_at),
                read_at = COALESCE(message_status.read_at, EXCLUDED.read_at),
                updated_at = EXCLUDED.updated_at
            WHERE {} < $7
            RETURNING {}
            "#,
            STATUS_RANK_SQL, SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MessageStatusRow>(&query)
            .bind(user_id)
            .bind(&ids)
            .bind(status.as_str())
            .bind(at)
            .bind(stamp_delivered)
            .bind(stamp_read)
            .bind(status.rank())
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaching_read_also_stamps_delivery() {
        assert_eq!(timestamp_columns(DeliveryStatus::Sent), (false, false));
        assert_eq!(timestamp_columns(DeliveryStatus::Delivered), (true, false));
        assert_eq!(timestamp_columns(DeliveryStatus::Read), (true, true));
    }
}
