//! Connection lifecycle and inbound command dispatch.
//!
//! The hub owns the session registry and ties connections to the presence
//! tracker and the message status engine. Transport code only feeds it
//! decoded frames; everything here is independent of WebSockets.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::models::message::{ChatMessage, MessageMeta};
use crate::models::message_status::{
    DeliveryStatus, MessageStatusRecord, ReadOutcome, StatusTransition,
};
use crate::models::presence::PresenceStatus;
use crate::realtime::events::{
    ClientCommand, ContactStatusPayload, DeliveredPayload, MessageAck, NewMessagePayload,
    ReactCommand, ReactionPayload, ReadPayload, ReadReceiptPayload, ServerEvent,
    StatusUpdateCommand, TypingPayload, UserJoinedPayload,
};
use crate::realtime::registry::{
    conversation_room, user_channel, Frame, SessionInfo, SessionRegistry,
};
use crate::repositories::contact::ContactRepositoryTrait;
use crate::repositories::conversation::ConversationRepositoryTrait;
use crate::services::heartbeat::PresenceNotifier;
use crate::services::message_status::MessageStatusService;
use crate::services::presence::PresenceTracker;
use crate::types::{ConnectionId, ConversationId, MessageId, UserId};

/// A freshly registered connection and the queue of frames to write to it.
pub struct ConnectedSession {
    pub info: SessionInfo,
    pub outbound: mpsc::Receiver<Frame>,
}

pub struct RealtimeHub {
    registry: SessionRegistry,
    tracker: Arc<PresenceTracker>,
    message_status: Arc<MessageStatusService>,
    conversations: Arc<dyn ConversationRepositoryTrait>,
    contacts: Arc<dyn ContactRepositoryTrait>,
    queue_capacity: usize,
}

impl RealtimeHub {
    pub fn new(
        tracker: Arc<PresenceTracker>,
        message_status: Arc<MessageStatusService>,
        conversations: Arc<dyn ConversationRepositoryTrait>,
        contacts: Arc<dyn ContactRepositoryTrait>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            tracker,
            message_status,
            conversations,
            contacts,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Registers an authenticated connection, joins its rooms and marks the
    /// device online. Room lookup and presence failures are logged; the
    /// connection is established regardless.
    pub async fn connect(
        &self,
        user_id: UserId,
        username: &str,
        device_id: &str,
    ) -> ConnectedSession {
        let (sender, outbound) = mpsc::channel(self.queue_capacity);
        let info = SessionInfo {
            connection_id: ConnectionId::new(),
            user_id,
            username: username.to_string(),
            device_id: device_id.to_string(),
        };
        let connection_id = info.connection_id;
        self.registry.register(info.clone(), sender);
        self.registry.join(connection_id, &user_channel(user_id));

        match self.conversations.conversation_ids_for_user(user_id).await {
            Ok(conversation_ids) => {
                for conversation_id in conversation_ids {
                    self.registry
                        .join(connection_id, &conversation_room(conversation_id));
                }
            }
            Err(err) => tracing::warn!(
                error = ?err,
                %user_id,
                "Failed to load conversations for room auto-join"
            ),
        }

        if let Err(err) = self
            .tracker
            .set_online(user_id, connection_id, device_id)
            .await
        {
            tracing::warn!(error = %err, %user_id, "Failed to record presence on connect");
        }
        self.broadcast_status(user_id, PresenceStatus::Online).await;

        tracing::info!(%user_id, %connection_id, device_id, "Realtime session connected");
        ConnectedSession { info, outbound }
    }

    /// Tears the session down and publishes the user's remaining status.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(info) = self.registry.unregister(connection_id) else {
            return;
        };

        let status = match self.tracker.set_offline(info.user_id, connection_id).await {
            Ok(Some(record)) => record.status,
            Ok(None) => PresenceStatus::Offline,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = %info.user_id,
                    "Failed to record presence on disconnect"
                );
                PresenceStatus::Offline
            }
        };
        self.broadcast_status(info.user_id, status).await;

        tracing::info!(
            user_id = %info.user_id,
            %connection_id,
            status = status.as_str(),
            "Realtime session disconnected"
        );
    }

    /// Decodes and dispatches one text frame.
    pub async fn handle_text(&self, connection_id: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle_command(connection_id, command).await,
            Err(err) => {
                tracing::debug!(error = %err, %connection_id, "Rejected malformed frame");
                self.registry
                    .emit_to_connection(connection_id, &ServerEvent::error("Invalid command"));
            }
        }
    }

    pub async fn handle_command(&self, connection_id: ConnectionId, command: ClientCommand) {
        let Some(session) = self.registry.session(connection_id) else {
            return;
        };
        let name = command.name();

        let result = match command {
            ClientCommand::JoinConversation(target) => {
                self.join_conversation(&session, target.conversation_id).await
            }
            ClientCommand::LeaveConversation(target) => {
                self.leave_conversation(&session, target.conversation_id).await
            }
            ClientCommand::NewMessage(message) => self.relay_new_message(&session, message).await,
            ClientCommand::TypingStart(target) => {
                self.relay_typing(&session, target.conversation_id, true).await
            }
            ClientCommand::TypingStop(target) => {
                self.relay_typing(&session, target.conversation_id, false).await
            }
            ClientCommand::MessageDelivered(ack) => self.acknowledge_delivery(&session, ack).await,
            ClientCommand::MessageRead(ack) => self.acknowledge_read(&session, ack).await,
            ClientCommand::MessageReact(reaction) => self.relay_reaction(&session, reaction).await,
            ClientCommand::StatusUpdate(update) => self.status_update(&session, update).await,
            ClientCommand::Heartbeat => {
                self.heartbeat(&session).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::debug!(
                error = ?err,
                %connection_id,
                user_id = %session.user_id,
                command = name,
                "Realtime command rejected"
            );
            self.registry
                .emit_to_connection(connection_id, &ServerEvent::error(err.client_message()));
        }
    }

    async fn ensure_participant(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), AppError> {
        if self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Not a participant of this conversation".into(),
            ))
        }
    }

    async fn message_in_conversation(
        &self,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<MessageMeta, AppError> {
        self.conversations
            .find_messages(&[message_id])
            .await?
            .into_iter()
            .find(|meta| meta.conversation_id == conversation_id)
            .ok_or_else(|| AppError::NotFound("Message not found".into()))
    }

    async fn join_conversation(
        &self,
        session: &SessionInfo,
        conversation_id: ConversationId,
    ) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, conversation_id)
            .await?;
        let room = conversation_room(conversation_id);
        self.registry.join(session.connection_id, &room);

        if let Err(err) = self
            .tracker
            .set_active_chat(session.user_id, Some(conversation_id))
            .await
        {
            tracing::warn!(error = %err, user_id = %session.user_id, "Failed to set active chat");
        }

        self.registry.emit_to_room_except(
            &room,
            Some(session.connection_id),
            &ServerEvent::UserJoinedConversation(UserJoinedPayload {
                user_id: session.user_id,
                username: session.username.clone(),
                conversation_id,
            }),
        );
        Ok(())
    }

    async fn leave_conversation(
        &self,
        session: &SessionInfo,
        conversation_id: ConversationId,
    ) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, conversation_id)
            .await?;
        self.registry
            .leave(session.connection_id, &conversation_room(conversation_id));

        match self
            .tracker
            .has_active_chat_open(session.user_id, conversation_id)
            .await
        {
            Ok(true) => {
                if let Err(err) = self.tracker.set_active_chat(session.user_id, None).await {
                    tracing::warn!(error = %err, user_id = %session.user_id, "Failed to clear active chat");
                }
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, user_id = %session.user_id, "Failed to read active chat")
            }
        }
        Ok(())
    }

    async fn relay_new_message(
        &self,
        session: &SessionInfo,
        message: ChatMessage,
    ) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, message.conversation_id)
            .await?;
        let meta = self
            .message_in_conversation(message.id, message.conversation_id)
            .await?;
        if meta.sender_id != session.user_id {
            return Err(AppError::Forbidden("Only the sender can publish a message".into()));
        }

        match self
            .conversations
            .participant_ids(message.conversation_id)
            .await
        {
            Ok(participants) => {
                let recipients: Vec<UserId> = participants
                    .into_iter()
                    .filter(|participant| *participant != session.user_id)
                    .collect();
                self.message_status
                    .create_initial_status(message.id, &recipients)
                    .await;
            }
            Err(err) => tracing::warn!(
                error = ?err,
                message_id = %message.id,
                "Failed to load participants for status seeding"
            ),
        }

        let sender = match self.contacts.find_profile(session.user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(error = ?err, user_id = %session.user_id, "Failed to load sender profile");
                None
            }
        };

        let room = conversation_room(message.conversation_id);
        let payload = NewMessagePayload::from_message(message, session.user_id, sender);
        self.registry
            .emit_to_room(&room, &ServerEvent::NewMessage(payload));
        Ok(())
    }

    async fn relay_typing(
        &self,
        session: &SessionInfo,
        conversation_id: ConversationId,
        started: bool,
    ) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, conversation_id)
            .await?;
        let payload = TypingPayload {
            user_id: session.user_id,
            username: session.username.clone(),
            conversation_id,
        };
        let event = if started {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStoppedTyping(payload)
        };
        self.registry.emit_to_room_except(
            &conversation_room(conversation_id),
            Some(session.connection_id),
            &event,
        );
        Ok(())
    }

    async fn relay_reaction(
        &self,
        session: &SessionInfo,
        reaction: ReactCommand,
    ) -> Result<(), AppError> {
        let emoji = reaction.emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > 16 {
            return Err(AppError::BadRequest("Invalid reaction".into()));
        }
        self.ensure_participant(session.user_id, reaction.conversation_id)
            .await?;
        self.message_in_conversation(reaction.message_id, reaction.conversation_id)
            .await?;

        self.registry.emit_to_room(
            &conversation_room(reaction.conversation_id),
            &ServerEvent::MessageReaction(ReactionPayload {
                message_id: reaction.message_id,
                conversation_id: reaction.conversation_id,
                user_id: session.user_id,
                username: session.username.clone(),
                emoji: emoji.to_string(),
            }),
        );
        Ok(())
    }

    async fn acknowledge_delivery(
        &self,
        session: &SessionInfo,
        ack: MessageAck,
    ) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, ack.conversation_id)
            .await?;
        let meta = self
            .message_in_conversation(ack.message_id, ack.conversation_id)
            .await?;
        if meta.sender_id == session.user_id {
            return Err(AppError::BadRequest("Cannot acknowledge own message".into()));
        }

        let transition = self
            .message_status
            .update_status(ack.message_id, session.user_id, DeliveryStatus::Delivered.as_str())
            .await?;
        self.publish_transition(&meta, &transition);
        Ok(())
    }

    async fn acknowledge_read(&self, session: &SessionInfo, ack: MessageAck) -> Result<(), AppError> {
        self.ensure_participant(session.user_id, ack.conversation_id)
            .await?;
        let meta = self
            .message_in_conversation(ack.message_id, ack.conversation_id)
            .await?;
        if meta.sender_id == session.user_id {
            return Err(AppError::BadRequest("Cannot mark own message as read".into()));
        }

        let outcome = self
            .message_status
            .mark_messages_as_read(session.user_id, &[ack.message_id])
            .await?;
        for record in &outcome.updated {
            self.registry
                .emit_to_user(meta.sender_id, &sender_event(session.user_id, &outcome, record));
        }
        Ok(())
    }

    async fn status_update(
        &self,
        session: &SessionInfo,
        update: StatusUpdateCommand,
    ) -> Result<(), AppError> {
        if let Some(active_chat_id) = update.active_chat_id {
            if let Some(conversation_id) = active_chat_id {
                self.ensure_participant(session.user_id, conversation_id)
                    .await?;
            }
            if let Err(err) = self
                .tracker
                .set_active_chat(session.user_id, active_chat_id)
                .await
            {
                tracing::warn!(error = %err, user_id = %session.user_id, "Failed to set active chat");
            }
        }
        self.heartbeat(session).await;

        let status = match update.status {
            Some(status) => status,
            None => match self.tracker.get_presence(session.user_id).await {
                Ok(record) => record
                    .map(|record| record.status)
                    .unwrap_or(PresenceStatus::Offline),
                Err(err) => {
                    tracing::warn!(error = %err, user_id = %session.user_id, "Failed to read presence");
                    return Ok(());
                }
            },
        };
        self.broadcast_status(session.user_id, status).await;
        Ok(())
    }

    /// Refreshes the connection's heartbeat. When that brings a user the
    /// sweep had expired back online, contacts are told.
    pub async fn heartbeat(&self, session: &SessionInfo) {
        match self
            .tracker
            .heartbeat(session.user_id, session.connection_id)
            .await
        {
            Ok(outcome) if outcome.came_online => {
                self.broadcast_status(session.user_id, PresenceStatus::Online)
                    .await
            }
            Ok(outcome) if !outcome.found => tracing::debug!(
                user_id = %session.user_id,
                connection_id = %session.connection_id,
                "Heartbeat for device not on record"
            ),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, user_id = %session.user_id, "Failed to record heartbeat")
            }
        }
    }

    /// Forwards an applied transition to the sender's personal channel.
    pub fn publish_transition(&self, meta: &MessageMeta, transition: &StatusTransition) {
        if !transition.applied || meta.sender_id == transition.record.user_id {
            return;
        }
        let record = &transition.record;
        let event = match record.status {
            DeliveryStatus::Sent => return,
            DeliveryStatus::Delivered => ServerEvent::MessageDelivered(DeliveredPayload {
                message_id: record.message_id,
                user_id: record.user_id,
                status: record.status,
                delivered_at: record.delivered_at,
            }),
            DeliveryStatus::Read => ServerEvent::MessageRead(ReadPayload {
                message_id: record.message_id,
                user_id: record.user_id,
                status: record.status,
                read_at: record.read_at,
            }),
        };
        self.registry.emit_to_user(meta.sender_id, &event);
    }

    /// Publishes a batch read: a receipt to each conversation room and one
    /// event per message to its sender. With receipts disabled only the
    /// delivery is forwarded.
    pub async fn publish_read_outcome(&self, reader: UserId, outcome: &ReadOutcome) {
        if outcome.updated.is_empty() {
            return;
        }
        let message_ids: Vec<MessageId> = outcome
            .updated
            .iter()
            .map(|record| record.message_id)
            .collect();
        let metas = match self.conversations.find_messages(&message_ids).await {
            Ok(metas) => metas,
            Err(err) => {
                tracing::warn!(error = ?err, %reader, "Failed to load messages for read fan-out");
                return;
            }
        };

        for record in &outcome.updated {
            let Some(meta) = metas.iter().find(|meta| meta.id == record.message_id) else {
                continue;
            };
            if meta.sender_id == reader {
                continue;
            }
            if outcome.read_receipts_enabled {
                self.registry.emit_to_room(
                    &conversation_room(meta.conversation_id),
                    &ServerEvent::MessageReadReceipt(ReadReceiptPayload {
                        message_id: record.message_id,
                        user_id: reader,
                        read_at: record.read_at,
                    }),
                );
            }
            self.registry.emit_to_user(
                meta.sender_id,
                &sender_event(reader, outcome, record),
            );
        }
    }

    /// Sends the user's aggregate status to each contact's personal channel.
    pub async fn broadcast_status(&self, user_id: UserId, status: PresenceStatus) {
        let contacts = match self.contacts.contact_ids(user_id).await {
            Ok(contacts) => contacts,
            Err(err) => {
                tracing::warn!(error = ?err, %user_id, "Failed to load contacts for status broadcast");
                return;
            }
        };
        let event = ServerEvent::ContactStatusChanged(ContactStatusPayload {
            user_id,
            status,
            timestamp: Utc::now(),
        });
        for contact_id in contacts {
            self.registry.emit_to_user(contact_id, &event);
        }
    }
}

/// Event for the sender of a message the reader just acknowledged.
fn sender_event(reader: UserId, outcome: &ReadOutcome, record: &MessageStatusRecord) -> ServerEvent {
    let message_id = record.message_id;
    if outcome.read_receipts_enabled {
        ServerEvent::MessageRead(ReadPayload {
            message_id,
            user_id: reader,
            status: outcome.applied_status,
            read_at: record.read_at,
        })
    } else {
        ServerEvent::MessageDelivered(DeliveredPayload {
            message_id,
            user_id: reader,
            status: outcome.applied_status,
            delivered_at: record.delivered_at,
        })
    }
}

#[async_trait]
impl PresenceNotifier for RealtimeHub {
    async fn presence_changed(&self, user_id: UserId, status: PresenceStatus) {
        self.broadcast_status(user_id, status).await;
    }
}
