use std::sync::Arc;

use crate::{
    config::Config,
    realtime::hub::RealtimeHub,
    repositories::conversation::ConversationRepositoryTrait,
    services::{message_status::MessageStatusService, presence::PresenceTracker},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tracker: Arc<PresenceTracker>,
    pub message_status: Arc<MessageStatusService>,
    pub conversations: Arc<dyn ConversationRepositoryTrait>,
    pub hub: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(
        config: Config,
        tracker: Arc<PresenceTracker>,
        message_status: Arc<MessageStatusService>,
        conversations: Arc<dyn ConversationRepositoryTrait>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            config,
            tracker,
            message_status,
            conversations,
            hub,
        }
    }
}
