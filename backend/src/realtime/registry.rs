//! Process-local registry of connected sessions and the rooms they joined.
//!
//! Conversation rooms are named `conversation:{id}` and every user has a
//! personal channel `user:{id}` joined by all of their sessions. Outbound
//! frames are queued per session and never block the emitter: a full queue
//! drops the frame.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::realtime::events::ServerEvent;
use crate::types::{ConnectionId, ConversationId, UserId};

pub type Frame = Arc<str>;

pub fn conversation_room(conversation_id: ConversationId) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn user_channel(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub device_id: String,
}

struct SessionEntry {
    info: SessionInfo,
    sender: mpsc::Sender<Frame>,
    rooms: HashSet<String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, SessionEntry>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: SessionInfo, sender: mpsc::Sender<Frame>) {
        self.sessions.insert(
            info.connection_id,
            SessionEntry {
                info,
                sender,
                rooms: HashSet::new(),
            },
        );
    }

    /// Removes the session from every room it joined and drops its queue.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<SessionInfo> {
        let (_, entry) = self.sessions.remove(&connection_id)?;
        for room in &entry.rooms {
            self.remove_member(room, connection_id);
        }
        Some(entry.info)
    }

    pub fn session(&self, connection_id: ConnectionId) -> Option<SessionInfo> {
        self.sessions
            .get(&connection_id)
            .map(|entry| entry.info.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns false when the connection is not registered.
    pub fn join(&self, connection_id: ConnectionId, room: &str) -> bool {
        {
            let Some(mut entry) = self.sessions.get_mut(&connection_id) else {
                return false;
            };
            entry.rooms.insert(room.to_string());
        }
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);
        // An unregister that ran between the two inserts missed this room.
        if !self.sessions.contains_key(&connection_id) {
            self.remove_member(room, connection_id);
            return false;
        }
        true
    }

    pub fn leave(&self, connection_id: ConnectionId, room: &str) {
        if let Some(mut entry) = self.sessions.get_mut(&connection_id) {
            entry.rooms.remove(room);
        }
        self.remove_member(room, connection_id);
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<String> {
        self.sessions
            .get(&connection_id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn emit_to_room(&self, room: &str, event: &ServerEvent) -> usize {
        self.emit_to_room_except(room, None, event)
    }

    /// Sends to every member of `room` other than `except`. Returns the
    /// number of sessions the frame was queued for.
    pub fn emit_to_room_except(
        &self,
        room: &str,
        except: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let members = self.room_members(room);
        if members.is_empty() {
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };
        let mut queued = 0;
        for member in members.into_iter().filter(|member| Some(*member) != except) {
            match self.push(member, &frame) {
                Push::Queued => queued += 1,
                Push::Dropped => {}
                Push::Gone => self.remove_member(room, member),
            }
        }
        queued
    }

    pub fn emit_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        self.emit_to_room(&user_channel(user_id), event)
    }

    pub fn emit_to_connection(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        match encode(event) {
            Some(frame) => self.push(connection_id, &frame) == Push::Queued,
            None => false,
        }
    }

    fn push(&self, connection_id: ConnectionId, frame: &Frame) -> Push {
        let Some(entry) = self.sessions.get(&connection_id) else {
            return Push::Gone;
        };
        match entry.sender.try_send(frame.clone()) {
            Ok(()) => Push::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    %connection_id,
                    user_id = %entry.info.user_id,
                    "Outbound queue full, dropping frame"
                );
                Push::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Push::Dropped,
        }
    }

    fn remove_member(&self, room: &str, connection_id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Push {
    Queued,
    Dropped,
    /// The connection is no longer registered.
    Gone,
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode realtime event");
            None
        }
    }
}
