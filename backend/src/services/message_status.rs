//! Delivery and read state machine for chat messages.
//!
//! Every (message, recipient) pair moves through `sent -> delivered -> read`
//! and never backwards. Requests at or below the stored level are answered
//! with the stored record rather than an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::AppError;
use crate::models::message_status::{
    DeliveryStatus, MessageStatusRecord, ReadOutcome, StatusTransition,
};
use crate::repositories::conversation::ConversationRepositoryTrait;
use crate::repositories::message_status::MessageStatusRepositoryTrait;
use crate::repositories::privacy::PrivacySettingsTrait;
use crate::types::{MessageId, UserId};

/// Status shown to the sender of a group message: any recipient still at
/// `sent` holds the whole message at `sent`, `read` needs every recipient.
pub fn aggregate_statuses<I>(statuses: I) -> DeliveryStatus
where
    I: IntoIterator<Item = DeliveryStatus>,
{
    let mut seen_any = false;
    let mut all_read = true;
    for status in statuses {
        seen_any = true;
        match status {
            DeliveryStatus::Sent => return DeliveryStatus::Sent,
            DeliveryStatus::Delivered => all_read = false,
            DeliveryStatus::Read => {}
        }
    }
    if seen_any && all_read {
        DeliveryStatus::Read
    } else if seen_any {
        DeliveryStatus::Delivered
    } else {
        DeliveryStatus::Sent
    }
}

fn parse_status(value: &str) -> Result<DeliveryStatus, AppError> {
    value
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid status: {}", value)))
}

#[derive(Clone)]
pub struct MessageStatusService {
    statuses: Arc<dyn MessageStatusRepositoryTrait>,
    conversations: Arc<dyn ConversationRepositoryTrait>,
    privacy: Arc<dyn PrivacySettingsTrait>,
}

impl MessageStatusService {
    pub fn new(
        statuses: Arc<dyn MessageStatusRepositoryTrait>,
        conversations: Arc<dyn ConversationRepositoryTrait>,
        privacy: Arc<dyn PrivacySettingsTrait>,
    ) -> Self {
        Self {
            statuses,
            conversations,
            privacy,
        }
    }

    /// Seeds `sent` rows for every recipient. Safe to repeat; failures are
    /// logged and never reach the caller.
    pub async fn create_initial_status(&self, message_id: MessageId, recipients: &[UserId]) {
        match self.statuses.insert_initial(message_id, recipients).await {
            Ok(inserted) => {
                tracing::debug!(%message_id, inserted, "Seeded initial message status")
            }
            Err(err) => tracing::warn!(
                error = ?err,
                %message_id,
                recipients = recipients.len(),
                "Failed to seed initial message status"
            ),
        }
    }

    pub async fn update_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        new_status: &str,
    ) -> Result<StatusTransition, AppError> {
        let new_status = parse_status(new_status)?;
        self.advance_to(message_id, user_id, new_status).await
    }

    /// A recipient acknowledging a message themselves. `read` from a user
    /// with read receipts turned off is stored as `delivered`.
    pub async fn acknowledge_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        new_status: &str,
    ) -> Result<StatusTransition, AppError> {
        let mut new_status = parse_status(new_status)?;
        if new_status == DeliveryStatus::Read && !self.privacy.read_receipts_enabled(user_id).await
        {
            new_status = DeliveryStatus::Delivered;
        }
        self.advance_to(message_id, user_id, new_status).await
    }

    async fn advance_to(
        &self,
        message_id: MessageId,
        user_id: UserId,
        new_status: DeliveryStatus,
    ) -> Result<StatusTransition, AppError> {
        let current = self
            .statuses
            .find(message_id, user_id)
            .await?
            .unwrap_or_else(|| MessageStatusRecord::unseeded(message_id, user_id));
        if new_status <= current.status {
            return Ok(StatusTransition {
                record: current,
                applied: false,
            });
        }

        match self
            .statuses
            .advance(message_id, user_id, new_status, Utc::now())
            .await?
        {
            Some(record) => {
                tracing::debug!(
                    %message_id,
                    %user_id,
                    from = %current.status,
                    to = %record.status,
                    "Message status advanced"
                );
                Ok(StatusTransition {
                    record,
                    applied: true,
                })
            }
            None => {
                // A concurrent acknowledgement reached an equal or higher level first.
                let record = self
                    .statuses
                    .find(message_id, user_id)
                    .await?
                    .unwrap_or(current);
                Ok(StatusTransition {
                    record,
                    applied: false,
                })
            }
        }
    }

    pub async fn aggregate_group_status(
        &self,
        message_id: MessageId,
    ) -> Result<DeliveryStatus, AppError> {
        let records = self.statuses.list_for_messages(&[message_id]).await?;
        Ok(aggregate_statuses(records.iter().map(|record| record.status)))
    }

    /// Marks the messages `user_id` received as read, or as delivered when
    /// the user has read receipts turned off. Own messages are skipped; a
    /// batch made only of own messages is rejected.
    pub async fn mark_messages_as_read(
        &self,
        user_id: UserId,
        message_ids: &[MessageId],
    ) -> Result<ReadOutcome, AppError> {
        if message_ids.is_empty() {
            return Err(AppError::BadRequest("messageIds must not be empty".into()));
        }

        let eligible: Vec<MessageId> = self
            .conversations
            .find_messages(message_ids)
            .await?
            .into_iter()
            .filter(|meta| meta.sender_id != user_id)
            .map(|meta| meta.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if eligible.is_empty() {
            return Err(AppError::BadRequest(
                "No messages eligible to mark as read".into(),
            ));
        }

        let read_receipts_enabled = self.privacy.read_receipts_enabled(user_id).await;
        let applied_status = if read_receipts_enabled {
            DeliveryStatus::Read
        } else {
            DeliveryStatus::Delivered
        };

        let updated = self
            .statuses
            .advance_unread(user_id, &eligible, applied_status, Utc::now())
            .await?;

        tracing::debug!(
            %user_id,
            requested = message_ids.len(),
            eligible = eligible.len(),
            updated = updated.len(),
            status = %applied_status,
            "Marked messages"
        );

        Ok(ReadOutcome {
            applied_status,
            read_receipts_enabled,
            updated,
        })
    }

    /// Status rows of the messages `requester_id` sent. Messages sent by
    /// others are dropped; if nothing is left the request is refused.
    pub async fn get_message_status(
        &self,
        message_ids: &[MessageId],
        requester_id: UserId,
    ) -> Result<Vec<MessageStatusRecord>, AppError> {
        let authorized: Vec<MessageId> = self
            .conversations
            .find_messages(message_ids)
            .await?
            .into_iter()
            .filter(|meta| meta.sender_id == requester_id)
            .map(|meta| meta.id)
            .collect();
        if authorized.is_empty() {
            return Err(AppError::Forbidden(
                "Unauthorized to view message status".into(),
            ));
        }

        self.statuses.list_for_messages(&authorized).await
    }
}
