//! Shared identifier types.

mod id;

pub use id::{ConnectionId, ConversationId, MessageId, UserId};
