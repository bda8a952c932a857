//! Conversation membership lookups used for authorization and room joins.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::message::MessageMeta;
use crate::types::{ConversationId, MessageId, UserId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepositoryTrait: Send + Sync {
    async fn conversation_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationId>, AppError>;

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, AppError>;

    async fn participant_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, AppError>;

    /// Sender and conversation of each known message; unknown ids are omitted.
    async fn find_messages(&self, message_ids: &[MessageId]) -> Result<Vec<MessageMeta>, AppError>;
}

#[derive(Debug, Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepositoryTrait for ConversationRepository {
    async fn conversation_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationId>, AppError> {
        let ids = sqlx::query_scalar::<_, ConversationId>(
            "SELECT conversation_id FROM conversation_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn participant_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, AppError> {
        let ids = sqlx::query_scalar::<_, UserId>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_messages(&self, message_ids: &[MessageId]) -> Result<Vec<MessageMeta>, AppError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
        let rows = sqlx::query_as::<_, MessageMeta>(
            "SELECT id, conversation_id, sender_id FROM messages WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
