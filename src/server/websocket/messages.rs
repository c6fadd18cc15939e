//! WebSocket message types.
//!
//! Clients send and receive a single envelope shape, `{"message": <value>}`.
//! Inside the relay an accepted envelope becomes a [`RoomEvent`], which is
//! what gets published to a room and serialized once per fanout.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

use super::connection::OutboundFrame;

/// Client <-> server chat envelope.
///
/// `message` may be any JSON value (string or structured). Any other
/// shape, including extra fields, is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub message: serde_json::Value,
}

impl ChatMessage {
    pub fn new(message: impl Into<serde_json::Value>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Parse a raw inbound frame.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Error type for inbound frames that are not a valid [`ChatMessage`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid chat message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Events published to a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A chat message relayed verbatim to every recipient.
    ChatMessage(ChatMessage),
}

impl RoomEvent {
    /// Serialize the event into the frame every recipient receives.
    pub fn to_frame(&self) -> Result<OutboundFrame, serde_json::Error> {
        let mut buf = Vec::with_capacity(64);
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
        match self {
            RoomEvent::ChatMessage(msg) => msg.serialize(&mut serializer)?,
        }
        Ok(Arc::from(String::from_utf8_lossy(&buf).as_ref()))
    }

    /// Label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RoomEvent::ChatMessage(_) => "chat.message",
        }
    }
}

/// Single-line JSON with `", "` and `": "` separators, the frame layout
/// chat clients already receive.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

impl From<ChatMessage> for RoomEvent {
    fn from(msg: ChatMessage) -> Self {
        RoomEvent::ChatMessage(msg)
    }
}
