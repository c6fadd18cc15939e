//! Room-based WebSocket chat relay.
//!
//! Clients connect to `/ws/chat/{room_name}` and every message they send is
//! relayed to all clients currently connected to the same room.

pub mod config;
pub mod server;
