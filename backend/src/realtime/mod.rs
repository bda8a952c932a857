//! Realtime fan-out over WebSockets.

pub mod events;
pub mod gateway;
pub mod hub;
pub mod registry;
