#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::{
    handlers::{
        messages::{
            AggregateStatusResponse, MessageIdsPayload, StatusUpdateResponse, UpdateStatusPayload,
        },
        presence::{ActiveChatResponse, PresenceResponse},
        HealthResponse,
    },
    models::{
        message::{ChatMessage, UserProfile},
        message_status::{DeliveryStatus, MessageStatusRecord, ReadOutcome},
        presence::PresenceStatus,
    },
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_doc,
        get_presence_doc,
        get_active_chat_doc,
        get_message_status_doc,
        mark_messages_read_doc,
        get_aggregate_status_doc,
        update_message_status_doc
    ),
    components(
        schemas(
            HealthResponse,
            // presence
            PresenceStatus,
            PresenceResponse,
            ActiveChatResponse,
            // message status
            DeliveryStatus,
            MessageStatusRecord,
            MessageIdsPayload,
            UpdateStatusPayload,
            StatusUpdateResponse,
            AggregateStatusResponse,
            ReadOutcome,
            // realtime payloads
            ChatMessage,
            UserProfile
        )
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "Presence", description = "Online status and open conversations"),
        (name = "Messages", description = "Delivery and read receipts"),
        (name = "System", description = "Health")
    ),
    security(("BearerAuth" = []))
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();

        let mut bearer = Http::new(HttpAuthScheme::Bearer);
        bearer.bearer_format = Some("JWT".to_string());

        components.add_security_scheme("BearerAuth", SecurityScheme::Http(bearer));
    }
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = HealthResponse)),
    tag = "System",
    security(())
)]
fn health_doc() {}

#[utoipa::path(
    get,
    path = "/api/presence/{user_id}",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Presence snapshot, offline when unknown", body = PresenceResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    tag = "Presence"
)]
fn get_presence_doc() {}

#[utoipa::path(
    get,
    path = "/api/presence/{user_id}/active-chat/{conversation_id}",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("conversation_id" = String, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, body = ActiveChatResponse),
        (status = 403, description = "Caller is not a participant")
    ),
    tag = "Presence"
)]
fn get_active_chat_doc() {}

#[utoipa::path(
    post,
    path = "/api/messages/status",
    request_body = MessageIdsPayload,
    responses(
        (status = 200, description = "Status rows of the caller's messages", body = [MessageStatusRecord]),
        (status = 403, description = "None of the messages were sent by the caller")
    ),
    tag = "Messages"
)]
fn get_message_status_doc() {}

#[utoipa::path(
    post,
    path = "/api/messages/read",
    request_body = MessageIdsPayload,
    responses(
        (status = 200, body = ReadOutcome),
        (status = 400, description = "Empty batch or only own messages")
    ),
    tag = "Messages"
)]
fn mark_messages_read_doc() {}

#[utoipa::path(
    get,
    path = "/api/messages/{id}/aggregate-status",
    params(("id" = String, Path, description = "Message ID")),
    responses(
        (status = 200, body = AggregateStatusResponse),
        (status = 403, description = "Caller is not the sender"),
        (status = 404, description = "Unknown message")
    ),
    tag = "Messages"
)]
fn get_aggregate_status_doc() {}

#[utoipa::path(
    put,
    path = "/api/messages/{id}/status",
    params(("id" = String, Path, description = "Message ID")),
    request_body = UpdateStatusPayload,
    responses(
        (status = 200, body = StatusUpdateResponse),
        (status = 400, description = "Unknown status or own message"),
        (status = 403, description = "Caller is not a participant")
    ),
    tag = "Messages"
)]
fn update_message_status_doc() {}
