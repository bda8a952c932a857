//! WebSocket endpoint: authenticates the upgrade and pumps frames between
//! the socket and the [`RealtimeHub`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::{
    error::AppError,
    middleware::{authenticate_token, parse_bearer_token, AuthUser},
    realtime::{events::ServerEvent, hub::RealtimeHub},
    state::AppState,
};

pub const DEFAULT_DEVICE_ID: &str = "default";
const MAX_DEVICE_ID_LENGTH: usize = 128;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub token: Option<String>,
    pub device_id: Option<String>,
}

/// Picks the device id from the handshake, falling back to a shared default.
pub fn resolve_device_id(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_DEVICE_ID_LENGTH)
        .unwrap_or(DEFAULT_DEVICE_ID)
        .to_string()
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token);
    let token = query
        .token
        .as_deref()
        .or(header_token)
        .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))?;
    let (_, user) = authenticate_token(token, &state.config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid access token".into()))?;

    let device_id = resolve_device_id(query.device_id.as_deref());
    let hub = state.hub.clone();
    let ping_every = Duration::from_secs(state.config.heartbeat_interval_seconds.max(1));
    Ok(ws.on_upgrade(move |socket| run_session(hub, socket, user, device_id, ping_every)))
}

async fn run_session(
    hub: Arc<RealtimeHub>,
    socket: WebSocket,
    user: AuthUser,
    device_id: String,
    ping_every: Duration,
) {
    let session = hub.connect(user.id, &user.username, &device_id).await;
    let info = session.info;
    let mut outbound = session.outbound;
    let (mut sink, mut stream) = socket.split();

    // Ends when the registry drops the session's sender or the socket fails.
    // Server pings draw pongs, which count as heartbeats for quiet clients.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        ping.tick().await;
        loop {
            let message = tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => Message::Text(frame.to_string().into()),
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Default::default()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => hub.handle_text(info.connection_id, text.as_str()).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => hub.heartbeat(&info).await,
            Ok(Message::Binary(_)) => {
                hub.registry().emit_to_connection(
                    info.connection_id,
                    &ServerEvent::error("Binary frames are not supported"),
                );
            }
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    connection_id = %info.connection_id,
                    "WebSocket read failed"
                );
                break;
            }
        }
    }

    hub.disconnect(info.connection_id).await;
    writer.abort();
}
