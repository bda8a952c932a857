//! Per-recipient delivery state of chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::types::{MessageId, UserId};

/// Delivery level of a message for one recipient. Variants are declared in
/// ascending order so the derived `Ord` matches `sent < delivered < read`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn rank(&self) -> i16 {
        match self {
            DeliveryStatus::Sent => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Read => 2,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for DeliveryStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusRecord {
    #[schema(value_type = String)]
    pub message_id: MessageId,
    #[schema(value_type = String)]
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl MessageStatusRecord {
    /// Baseline for a recipient whose row has not been seeded.
    pub fn unseeded(message_id: MessageId, user_id: UserId) -> Self {
        Self {
            message_id,
            user_id,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            read_at: None,
        }
    }
}

/// Raw `message_status` row; the status column is plain text.
#[derive(Debug, Clone, FromRow)]
pub struct MessageStatusRow {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageStatusRow> for MessageStatusRecord {
    type Error = InvalidStatus;

    fn try_from(row: MessageStatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            message_id: row.message_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
        })
    }
}

/// Result of a single status update request.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub record: MessageStatusRecord,
    /// False when the request was at or below the stored level.
    pub applied: bool,
}

/// Result of marking a batch of messages as read.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    /// Status actually written; `delivered` when read receipts are disabled.
    pub applied_status: DeliveryStatus,
    pub read_receipts_enabled: bool,
    pub updated: Vec<MessageStatusRecord>,
}
