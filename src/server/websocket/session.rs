//! Per-connection session lifecycle.
//!
//! `Connecting -> Joined -> Closed`. Opening joins the room, every inbound
//! frame while joined is decoded and published, and closing leaves the room
//! exactly once no matter how many paths (transport close, socket error,
//! eviction) race to close it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::connection::ConnectionRef;
use super::dispatcher::{DeliveryReport, FanoutDispatcher};
use super::messages::{ChatMessage, DecodeError, RoomEvent};
use super::room_registry::RegistryError;
use crate::server::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session has not joined its room yet")]
    NotJoined,
    #[error("session already joined its room")]
    AlreadyOpen,
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result of handling one inbound frame.
#[derive(Debug)]
pub enum MessageOutcome {
    Published(DeliveryReport),
    /// The frame was not a valid chat message and was dropped.
    Dropped(DecodeError),
}

pub struct SessionController {
    room: String,
    connection: ConnectionRef,
    dispatcher: Arc<FanoutDispatcher>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(
        room: impl Into<String>,
        connection: ConnectionRef,
        dispatcher: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            room: room.into(),
            connection,
            dispatcher,
            state: Mutex::new(SessionState::Connecting),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the room. A connection that is already dead closes the session.
    pub fn open(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        match *state {
            SessionState::Connecting => {}
            SessionState::Joined => return Err(SessionError::AlreadyOpen),
            SessionState::Closed => return Err(SessionError::Closed),
        }

        if let Err(e) = self.dispatcher.registry().join(&self.room, &self.connection) {
            *state = SessionState::Closed;
            return Err(e.into());
        }
        *state = SessionState::Joined;
        debug!(
            "Session for connection {} joined room {:?}",
            self.connection.id(),
            self.room
        );
        Ok(())
    }

    /// Decode `raw` and publish it to the room.
    ///
    /// A malformed frame is dropped and reported without changing state.
    pub async fn on_message(&self, raw: &[u8]) -> Result<MessageOutcome, SessionError> {
        match self.state() {
            SessionState::Joined => {}
            SessionState::Connecting => return Err(SessionError::NotJoined),
            SessionState::Closed => return Err(SessionError::Closed),
        }
        // Evicted by the dispatcher, no longer a member of the room
        if !self.connection.is_alive() {
            return Err(SessionError::Closed);
        }

        let event = match ChatMessage::decode(raw) {
            Ok(msg) => RoomEvent::from(msg),
            Err(e) => {
                metrics::record_decode_error();
                debug!(
                    "Dropping malformed message from connection {}: {}",
                    self.connection.id(),
                    e
                );
                return Ok(MessageOutcome::Dropped(e));
            }
        };

        let exclude = self.dispatcher.exclusion_for(self.connection.id());
        let report = self.dispatcher.publish(&self.room, &event, exclude).await;
        metrics::record_message_published();
        Ok(MessageOutcome::Published(report))
    }

    /// Move to `Closed`, leaving the room if joined.
    ///
    /// Returns true only for the call that performed the transition.
    pub async fn close(&self) -> bool {
        let was_joined = {
            let mut state = self.lock_state();
            if *state == SessionState::Closed {
                return false;
            }
            let was_joined = *state == SessionState::Joined;
            *state = SessionState::Closed;
            was_joined
        };

        self.connection.mark_dead();
        if was_joined {
            self.dispatcher
                .registry()
                .leave(&self.room, self.connection.id())
                .await;
        }
        debug!(
            "Session for connection {} closed (room {:?})",
            self.connection.id(),
            self.room
        );
        true
    }
}
