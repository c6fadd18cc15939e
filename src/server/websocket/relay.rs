//! Transport-facing entry point of the relay.
//!
//! The WebSocket handler only ever talks to [`ChatRelay`]: it opens a
//! connection for a room, feeds it inbound frames and closes it. Everything
//! else (membership, fanout, slow subscriber handling) sits behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId, ConnectionRef, DeliveryPolicy, OutboundFrame};
use super::dispatcher::{EchoPolicy, FanoutDispatcher};
use super::room_registry::RoomRegistry;
use super::session::{MessageOutcome, SessionController, SessionError};
use crate::server::metrics;

/// Runtime settings for the relay core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub delivery: DeliveryPolicy,
    pub echo: EchoPolicy,
    /// Frames buffered per connection before backpressure applies.
    pub outbound_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryPolicy::default(),
            echo: EchoPolicy::default(),
            outbound_buffer_size: 32,
        }
    }
}

/// A freshly joined connection handed back to the transport.
///
/// The transport writes every frame from `receiver` to the socket and
/// watches `connection.closed()` to learn when the relay gave up on it.
pub struct OpenedConnection {
    pub connection: ConnectionRef,
    pub receiver: mpsc::Receiver<OutboundFrame>,
}

pub struct ChatRelay {
    dispatcher: Arc<FanoutDispatcher>,
    sessions: DashMap<ConnectionId, Arc<SessionController>>,
    outbound_buffer_size: usize,
    accepting: AtomicBool,
}

impl ChatRelay {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            dispatcher: Arc::new(FanoutDispatcher::new(registry, config.delivery, config.echo)),
            sessions: DashMap::new(),
            outbound_buffer_size: config.outbound_buffer_size.max(1),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Arc<FanoutDispatcher> {
        &self.dispatcher
    }

    /// Accept a new connection into `room`.
    ///
    /// The session is registered before it joins, so a concurrent
    /// [`ChatRelay::shutdown`] either sees and closes it or makes this call
    /// observe that the relay stopped accepting.
    pub fn on_open(&self, room: &str) -> Result<OpenedConnection, SessionError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let (connection, receiver) = Connection::channel(self.outbound_buffer_size);
        let id = connection.id();
        let session = Arc::new(SessionController::new(
            room,
            connection.clone(),
            self.dispatcher.clone(),
        ));
        self.sessions.insert(id, session.clone());

        if !self.accepting.load(Ordering::SeqCst) {
            self.sessions.remove(&id);
            connection.mark_dead();
            return Err(SessionError::Closed);
        }
        // Fails if shutdown closed the session first
        if let Err(e) = session.open() {
            self.sessions.remove(&id);
            return Err(e);
        }
        metrics::set_connections_active(self.sessions.len());

        info!("Connection {} opened in room {:?}", id, room);
        Ok(OpenedConnection {
            connection,
            receiver,
        })
    }

    /// Handle one inbound frame from `connection_id`.
    ///
    /// Unknown or already closed connections get [`SessionError::Closed`].
    pub async fn on_message(
        &self,
        connection_id: &ConnectionId,
        raw: &[u8],
    ) -> Result<MessageOutcome, SessionError> {
        let session = self
            .sessions
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::Closed)?;
        session.on_message(raw).await
    }

    /// Close `connection_id`. Returns true if this call closed it.
    pub async fn on_close(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, session)) = self.sessions.remove(connection_id) else {
            return false;
        };
        metrics::set_connections_active(self.sessions.len());

        let closed = session.close().await;
        if closed {
            info!(
                "Connection {} closed in room {:?}",
                connection_id,
                session.room()
            );
        }
        closed
    }

    /// Stop accepting connections and close every open session.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        debug!("Shutting down relay, closing {} connections", ids.len());
        for id in ids {
            self.on_close(&id).await;
        }
        self.registry().clear().await;
        metrics::set_connections_active(0);
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.registry().room_count()
    }

    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.registry()
            .members(room)
            .iter()
            .map(|connection| connection.id())
            .collect()
    }
}

impl Default for ChatRelay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
