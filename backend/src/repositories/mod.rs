pub mod contact;
pub mod conversation;
pub mod message_status;
pub mod presence_store;
pub mod privacy;
