//! A single client connection as seen by the relay core.
//!
//! The transport owns the socket; the core only holds a [`ConnectionRef`]
//! and talks to it through a bounded outbound channel. Each frame is an
//! already serialized JSON text shared between all recipients of a fanout.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A serialized outbound frame, shared between recipients.
pub type OutboundFrame = Arc<str>;

pub type ConnectionRef = Arc<Connection>;

/// Opaque identity assigned when the connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The outbound buffer is full and the policy says drop.
    #[error("outbound buffer full")]
    Full,
    /// The bounded wait for buffer space elapsed.
    #[error("timed out waiting for outbound buffer space")]
    TimedOut,
    /// The receiving side of the connection is gone.
    #[error("connection closed")]
    Closed,
    /// The connection was already marked dead.
    #[error("connection is dead")]
    Dead,
}

impl SendError {
    /// Label used for the deliveries metric.
    pub fn as_label(&self) -> &'static str {
        match self {
            SendError::Full => "full",
            SendError::TimedOut => "timed_out",
            SendError::Closed => "closed",
            SendError::Dead => "dead",
        }
    }
}

/// What to do when a subscriber's outbound buffer is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Never wait: drop the frame for that subscriber.
    Drop,
    /// Wait for buffer space, up to the given timeout.
    Wait(Duration),
}

/// Delivery rules applied to every send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub backpressure: BackpressurePolicy,
    /// Consecutive failed deliveries after which the connection is marked dead.
    pub max_consecutive_failures: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            backpressure: BackpressurePolicy::Drop,
            max_consecutive_failures: 8,
        }
    }
}

/// An accepted connection with a bounded outbound queue.
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<OutboundFrame>,
    alive: AtomicBool,
    consecutive_failures: AtomicU32,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection wrapping an existing outbound sender.
    pub fn new(id: ConnectionId, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            sender,
            alive: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Create a connection with a fresh id and an outbound buffer of `buffer` frames.
    ///
    /// The caller forwards frames from the returned receiver to the socket.
    pub fn channel(buffer: usize) -> (ConnectionRef, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Arc::new(Self::new(ConnectionId::new(), tx)), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection dead. Returns true only for the call that flipped it.
    pub fn mark_dead(&self) -> bool {
        let flipped = self.alive.swap(false, Ordering::AcqRel);
        if flipped {
            debug!("Connection {} marked dead", self.id);
            self.closed.cancel();
        }
        flipped
    }

    /// Resolves once the connection has been marked dead.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Enqueue a frame according to `policy`.
    ///
    /// A closed channel, or `max_consecutive_failures` failures in a row,
    /// marks the connection dead. A successful send resets the failure count.
    pub async fn send(&self, frame: OutboundFrame, policy: &DeliveryPolicy) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Dead);
        }

        let result = match policy.backpressure {
            BackpressurePolicy::Drop => self.sender.try_send(frame).map_err(|e| match e {
                TrySendError::Full(_) => SendError::Full,
                TrySendError::Closed(_) => SendError::Closed,
            }),
            BackpressurePolicy::Wait(timeout) => {
                self.sender
                    .send_timeout(frame, timeout)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => SendError::TimedOut,
                        SendTimeoutError::Closed(_) => SendError::Closed,
                    })
            }
        };

        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(SendError::Closed) => {
                self.mark_dead();
                Err(SendError::Closed)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= policy.max_consecutive_failures {
                    self.mark_dead();
                }
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
