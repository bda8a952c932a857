use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppError,
    middleware::AuthUser,
    models::presence::{PresenceRecord, PresenceStatus},
    state::AppState,
    types::{ConversationId, UserId},
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    #[schema(value_type = String)]
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub online_devices: usize,
}

impl PresenceResponse {
    fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: None,
            online_devices: 0,
        }
    }
}

impl From<PresenceRecord> for PresenceResponse {
    fn from(record: PresenceRecord) -> Self {
        Self {
            user_id: record.user_id,
            status: record.status,
            last_seen: Some(record.last_seen),
            online_devices: record.online_device_count(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActiveChatResponse {
    pub open: bool,
}

pub async fn get_presence(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceResponse>, AppError> {
    let response = state
        .tracker
        .get_presence(user_id)
        .await?
        .map(PresenceResponse::from)
        .unwrap_or_else(|| PresenceResponse::offline(user_id));
    Ok(Json(response))
}

/// Whether `user_id` currently has the conversation open on any device.
/// Only participants of that conversation may ask.
pub async fn get_active_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((user_id, conversation_id)): Path<(UserId, ConversationId)>,
) -> Result<Json<ActiveChatResponse>, AppError> {
    if !state
        .conversations
        .is_participant(conversation_id, user.id)
        .await?
    {
        return Err(AppError::Forbidden(
            "Not a participant of this conversation".into(),
        ));
    }
    let open = state
        .tracker
        .has_active_chat_open(user_id, conversation_id)
        .await?;
    Ok(Json(ActiveChatResponse { open }))
}
