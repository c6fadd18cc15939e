//! WebSocket infrastructure for room-based chat.
//!
//! Connections join a named room on upgrade; every message a connection
//! sends is fanned out to the current members of that room.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod messages;
pub mod relay;
pub mod room_registry;
pub mod session;

pub use connection::{
    BackpressurePolicy, Connection, ConnectionId, ConnectionRef, DeliveryPolicy, OutboundFrame,
    SendError,
};
pub use dispatcher::{DeliveryReport, EchoPolicy, FanoutDispatcher};
pub use handler::ws_handler;
pub use messages::{ChatMessage, DecodeError, RoomEvent};
pub use relay::{ChatRelay, OpenedConnection, RelayConfig};
pub use room_registry::{Membership, RegistryError, RoomRegistry};
pub use session::{MessageOutcome, SessionController, SessionError, SessionState};
