//! Wire format of the realtime channel.
//!
//! Frames in both directions are JSON objects of the form
//! `{"event": "<kebab-case name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::message::{ChatMessage, UserProfile};
use crate::models::message_status::DeliveryStatus;
use crate::models::presence::PresenceStatus;
use crate::types::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub sender_id: UserId,
    pub sender: Option<UserProfile>,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

impl NewMessagePayload {
    pub fn from_message(message: ChatMessage, sender_id: UserId, sender: Option<UserProfile>) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            content: message.content,
            message_type: message.message_type,
            sender_id,
            sender,
            reply_to_id: message.reply_to_id,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: UserId,
    pub username: String,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredPayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactStatusPayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedPayload {
    pub user_id: UserId,
    pub username: String,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub username: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(NewMessagePayload),
    UserTyping(TypingPayload),
    UserStoppedTyping(TypingPayload),
    MessageReadReceipt(ReadReceiptPayload),
    MessageDelivered(DeliveredPayload),
    MessageRead(ReadPayload),
    ContactStatusChanged(ContactStatusPayload),
    UserJoinedConversation(UserJoinedPayload),
    MessageReaction(ReactionPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactCommand {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateCommand {
    /// Announced to contacts as given. Absent: announce the stored aggregate.
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    /// Absent: leave the open conversation alone. `null`: clear it.
    #[serde(default, deserialize_with = "present")]
    pub active_chat_id: Option<Option<ConversationId>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Commands sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    NewMessage(ChatMessage),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
    MessageDelivered(MessageAck),
    MessageRead(MessageAck),
    MessageReact(ReactCommand),
    StatusUpdate(StatusUpdateCommand),
    Heartbeat,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinConversation(_) => "join-conversation",
            ClientCommand::LeaveConversation(_) => "leave-conversation",
            ClientCommand::NewMessage(_) => "new-message",
            ClientCommand::TypingStart(_) => "typing-start",
            ClientCommand::TypingStop(_) => "typing-stop",
            ClientCommand::MessageDelivered(_) => "message-delivered",
            ClientCommand::MessageRead(_) => "message-read",
            ClientCommand::MessageReact(_) => "message-react",
            ClientCommand::StatusUpdate(_) => "status-update",
            ClientCommand::Heartbeat => "heartbeat",
        }
    }
}
