pub mod heartbeat;
pub mod message_status;
pub mod presence;
