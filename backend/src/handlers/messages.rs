use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::AuthUser,
    models::{
        message::MessageMeta,
        message_status::{DeliveryStatus, MessageStatusRecord, ReadOutcome},
    },
    state::AppState,
    types::{MessageId, UserId},
};

pub const MAX_BATCH_SIZE: u64 = 500;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdsPayload {
    #[schema(value_type = Vec<String>)]
    #[validate(length(min = 1, max = 500))]
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateStatusPayload {
    #[schema(example = "delivered")]
    #[validate(length(min = 1, max = 16))]
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateResponse {
    pub record: MessageStatusRecord,
    pub applied: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatusResponse {
    #[schema(value_type = String)]
    pub message_id: MessageId,
    pub status: DeliveryStatus,
}

async fn find_message(state: &AppState, message_id: MessageId) -> Result<MessageMeta, AppError> {
    state
        .conversations
        .find_messages(&[message_id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Message not found".into()))
}

pub async fn get_message_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<MessageIdsPayload>,
) -> Result<Json<Vec<MessageStatusRecord>>, AppError> {
    payload.validate()?;
    let records = state
        .message_status
        .get_message_status(&payload.message_ids, user.id)
        .await?;
    Ok(Json(records))
}

pub async fn mark_messages_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<MessageIdsPayload>,
) -> Result<Json<ReadOutcome>, AppError> {
    payload.validate()?;
    let outcome = state
        .message_status
        .mark_messages_as_read(user.id, &payload.message_ids)
        .await?;
    state.hub.publish_read_outcome(user.id, &outcome).await;
    Ok(Json(outcome))
}

pub async fn get_aggregate_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(message_id): Path<MessageId>,
) -> Result<Json<AggregateStatusResponse>, AppError> {
    let meta = find_message(&state, message_id).await?;
    if meta.sender_id != user.id {
        return Err(AppError::Forbidden(
            "Unauthorized to view message status".into(),
        ));
    }
    let status = state
        .message_status
        .aggregate_group_status(message_id)
        .await?;
    Ok(Json(AggregateStatusResponse { message_id, status }))
}

pub async fn update_message_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(message_id): Path<MessageId>,
    Json(payload): Json<UpdateStatusPayload>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    payload.validate()?;
    let meta = find_message(&state, message_id).await?;
    ensure_recipient(&state, &meta, user.id).await?;

    let transition = state
        .message_status
        .acknowledge_status(message_id, user.id, &payload.status)
        .await?;
    state.hub.publish_transition(&meta, &transition);

    Ok(Json(StatusUpdateResponse {
        record: transition.record,
        applied: transition.applied,
    }))
}

async fn ensure_recipient(
    state: &AppState,
    meta: &MessageMeta,
    user_id: UserId,
) -> Result<(), AppError> {
    if meta.sender_id == user_id {
        return Err(AppError::BadRequest(
            "Cannot update status of own message".into(),
        ));
    }
    if !state
        .conversations
        .is_participant(meta.conversation_id, user_id)
        .await?
    {
        return Err(AppError::Forbidden(
            "Not a participant of this conversation".into(),
        ));
    }
    Ok(())
}
