//! Read-side views of messages and profiles owned by the CRUD layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{ConversationId, MessageId, UserId};

/// Ownership facts needed to authorize status operations on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct MessageMeta {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
}

/// Profile snapshot attached to relayed messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[schema(value_type = String)]
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Persisted message echoed by a client after creating it over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[schema(value_type = String)]
    pub id: MessageId,
    #[schema(value_type = String)]
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    #[schema(value_type = Option<String>)]
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

fn default_message_type() -> String {
    "text".to_string()
}
