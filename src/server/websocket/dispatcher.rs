//! Room fanout.
//!
//! A publish takes a membership snapshot, serializes the event once and
//! delivers it to every member concurrently. Deliveries are independent:
//! a full, slow or closed subscriber never blocks or aborts the others.
//! Members whose connection ends up dead are evicted from the room.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, warn};

use super::connection::{ConnectionId, DeliveryPolicy, SendError};
use super::messages::RoomEvent;
use super::room_registry::RoomRegistry;
use crate::server::metrics;

/// Whether a publisher receives its own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Deliver to every member, sender included.
    #[default]
    IncludeSender,
    /// Skip the sender.
    ExcludeSender,
}

/// Per-member outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub room: String,
    pub delivered: Vec<ConnectionId>,
    pub failed: Vec<(ConnectionId, SendError)>,
    /// Failed members that were marked dead and removed from the room.
    pub evicted: Vec<ConnectionId>,
    /// Members excluded, or that left while the publish was in flight.
    pub skipped: usize,
}

impl DeliveryReport {
    fn empty(room: &str) -> Self {
        Self {
            room: room.to_string(),
            ..Default::default()
        }
    }

    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<ConnectionId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Delivers room events to the members of a room.
pub struct FanoutDispatcher {
    registry: Arc<RoomRegistry>,
    policy: DeliveryPolicy,
    echo: EchoPolicy,
}

impl FanoutDispatcher {
    pub fn new(registry: Arc<RoomRegistry>, policy: DeliveryPolicy, echo: EchoPolicy) -> Self {
        Self {
            registry,
            policy,
            echo,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo
    }

    /// Connection to exclude when `sender` publishes, according to the echo policy.
    pub fn exclusion_for(&self, sender: ConnectionId) -> Option<ConnectionId> {
        match self.echo {
            EchoPolicy::IncludeSender => None,
            EchoPolicy::ExcludeSender => Some(sender),
        }
    }

    /// Deliver `event` to every current member of `room` except `exclude`.
    pub async fn publish(
        &self,
        room: &str,
        event: &RoomEvent,
        exclude: Option<ConnectionId>,
    ) -> DeliveryReport {
        let start = Instant::now();

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {} for room {:?}: {}", event.kind(), room, e);
                return DeliveryReport::empty(room);
            }
        };

        let snapshot = self.registry.memberships(room);
        let mut report = DeliveryReport::empty(room);

        let targets: Vec<_> = snapshot
            .iter()
            .filter(|m| Some(m.connection().id()) != exclude)
            .collect();
        report.skipped = snapshot.len() - targets.len();

        let outcomes = join_all(targets.into_iter().map(|membership| {
            let frame = frame.clone();
            let policy = &self.policy;
            async move {
                let outcome = membership.send_if_member(frame, policy).await;
                (membership, outcome)
            }
        }))
        .await;

        let mut dead = Vec::new();
        for (membership, outcome) in outcomes {
            let connection = membership.connection();
            match outcome {
                None => report.skipped += 1,
                Some(Ok(())) => {
                    metrics::record_delivery("delivered");
                    report.delivered.push(connection.id());
                }
                Some(Err(e)) => {
                    metrics::record_delivery(e.as_label());
                    if connection.is_alive() {
                        warn!(
                            "Failed to deliver to connection {} in room {:?}: {} ({} in a row)",
                            connection.id(),
                            room,
                            e,
                            connection.consecutive_failures()
                        );
                    } else {
                        dead.push(connection.id());
                    }
                    report.failed.push((connection.id(), e));
                }
            }
        }

        for id in dead {
            if self.registry.leave(room, id).await {
                warn!("Evicted dead connection {} from room {:?}", id, room);
                metrics::record_eviction();
                report.evicted.push(id);
            }
        }

        metrics::record_publish(start.elapsed());
        debug!(
            "Published {} to room {:?}: {} delivered, {} failed, {} skipped",
            event.kind(),
            room,
            report.delivered.len(),
            report.failed.len(),
            report.skipped
        );
        report
    }
}
