pub mod message;
pub mod message_status;
pub mod presence;
