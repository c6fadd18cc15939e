//! Room membership tracking.
//!
//! Maps a room name to the set of connections currently joined to it.
//! Rooms live in a sharded map, so operations on different rooms never
//! contend on one lock, while join/leave/snapshot on the same room are
//! serialized by that room's shard.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{ConnectionId, ConnectionRef, DeliveryPolicy, OutboundFrame, SendError};
use crate::server::metrics;

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

/// One connection's membership in one room.
///
/// Deliveries hold the read side of `active` while enqueueing, leave takes
/// the write side, so once `leave` returns no frame for this room can still
/// be enqueued to the connection.
pub struct Membership {
    connection: ConnectionRef,
    active: RwLock<bool>,
}

impl Membership {
    fn new(connection: ConnectionRef) -> Self {
        Self {
            connection,
            active: RwLock::new(true),
        }
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    /// Send `frame` unless the membership has ended.
    ///
    /// Returns `None` when the connection already left the room.
    pub async fn send_if_member(
        &self,
        frame: OutboundFrame,
        policy: &DeliveryPolicy,
    ) -> Option<Result<(), SendError>> {
        let active = self.active.read().await;
        if !*active {
            return None;
        }
        Some(self.connection.send(frame, policy).await)
    }

    async fn deactivate(&self) {
        *self.active.write().await = false;
    }
}

type Members = HashMap<ConnectionId, Arc<Membership>>;

/// Registry of rooms and their members.
///
/// Created once at service start and passed explicitly to whoever needs it.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Members>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add `connection` to `room`, creating the room if needed.
    ///
    /// Joining a room the connection is already in is a no-op.
    pub fn join(&self, room: &str, connection: &ConnectionRef) -> Result<(), RegistryError> {
        if !connection.is_alive() {
            return Err(RegistryError::ConnectionClosed(connection.id()));
        }

        let joined = {
            let mut members = self.rooms.entry(room.to_string()).or_default();
            let mut joined = false;
            members.entry(connection.id()).or_insert_with(|| {
                joined = true;
                Arc::new(Membership::new(connection.clone()))
            });
            joined
        };

        if joined {
            debug!("Connection {} joined room {:?}", connection.id(), room);
            metrics::set_rooms_active(self.room_count());
        }
        Ok(())
    }

    /// Remove `connection_id` from `room`. No-op if it is not a member.
    ///
    /// Returns true if the connection was a member. An emptied room is evicted.
    pub async fn leave(&self, room: &str, connection_id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&connection_id),
            None => None,
        };
        let evicted = self
            .rooms
            .remove_if(room, |_, members| members.is_empty())
            .is_some();

        if evicted {
            debug!("Room {:?} is empty, evicted", room);
            metrics::set_rooms_active(self.room_count());
        }

        match removed {
            Some(membership) => {
                membership.deactivate().await;
                debug!("Connection {} left room {:?}", connection_id, room);
                true
            }
            None => false,
        }
    }

    /// Point-in-time snapshot of the connections in `room`.
    pub fn members(&self, room: &str) -> Vec<ConnectionRef> {
        self.rooms
            .get(room)
            .map(|members| members.values().map(|m| m.connection.clone()).collect())
            .unwrap_or_default()
    }

    /// Point-in-time snapshot of the memberships in `room`, used for fanout.
    pub fn memberships(&self, room: &str) -> Vec<Arc<Membership>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains_key(&connection_id))
            .unwrap_or(false)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Names of all non-empty rooms.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every membership. Used at shutdown.
    pub async fn clear(&self) {
        let mut drained = Vec::new();
        self.rooms.retain(|_, members| {
            drained.extend(members.drain().map(|(_, membership)| membership));
            false
        });
        for membership in drained {
            membership.deactivate().await;
        }
        metrics::set_rooms_active(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::websocket::connection::Connection;

    #[tokio::test]
    async fn join_creates_room() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = Connection::channel(4);

        registry.join("lobby", &conn).unwrap();

        assert_eq!(registry.room_count(), 1);
        assert!(registry.is_member("lobby", conn.id()));
    }

    #[tokio::test]
    async fn join_twice_is_noop() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = Connection::channel(4);

        registry.join("lobby", &conn).unwrap();
        registry.join("lobby", &conn).unwrap();

        assert_eq!(registry.member_count("lobby"), 1);
    }

    #[tokio::test]
    async fn join_rejects_dead_connection() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = Connection::channel(4);
        conn.mark_dead();

        let result = registry.join("lobby", &conn);

        assert_eq!(result, Err(RegistryError::ConnectionClosed(conn.id())));
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn leave_non_member_is_noop() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = Connection::channel(4);
        let (b, _rx_b) = Connection::channel(4);
        registry.join("lobby", &a).unwrap();

        assert!(!registry.leave("lobby", b.id()).await);
        assert!(!registry.leave("nowhere", a.id()).await);

        assert_eq!(registry.member_count("lobby"), 1);
    }

    #[tokio::test]
    async fn leave_evicts_empty_room() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = Connection::channel(4);
        registry.join("lobby", &conn).unwrap();

        assert!(registry.leave("lobby", conn.id()).await);

        assert_eq!(registry.room_count(), 0);
        assert!(registry.rooms().is_empty());
    }

    #[tokio::test]
    async fn leave_keeps_room_with_remaining_members() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = Connection::channel(4);
        let (b, _rx_b) = Connection::channel(4);
        registry.join("lobby", &a).unwrap();
        registry.join("lobby", &b).unwrap();

        registry.leave("lobby", a.id()).await;

        assert_eq!(registry.rooms(), vec!["lobby".to_string()]);
        assert!(registry.is_member("lobby", b.id()));
    }

    #[tokio::test]
    async fn unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.members("nowhere").is_empty());
        assert!(registry.memberships("nowhere").is_empty());
        assert_eq!(registry.member_count("nowhere"), 0);
    }

    #[tokio::test]
    async fn room_names_are_case_sensitive() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = Connection::channel(4);
        let (b, _rx_b) = Connection::channel(4);
        registry.join("Lobby", &a).unwrap();
        registry.join("lobby", &b).unwrap();

        assert_eq!(registry.room_count(), 2);
        assert_eq!(registry.member_count("Lobby"), 1);
        assert_eq!(registry.member_count("lobby"), 1);
    }

    #[tokio::test]
    async fn snapshot_is_not_affected_by_later_changes() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = Connection::channel(4);
        let (b, _rx_b) = Connection::channel(4);
        let (c, _rx_c) = Connection::channel(4);
        registry.join("lobby", &a).unwrap();
        registry.join("lobby", &b).unwrap();

        let snapshot = registry.members("lobby");
        registry.leave("lobby", a.id()).await;
        registry.join("lobby", &c).unwrap();

        let mut ids: Vec<_> = snapshot.iter().map(|c| c.id()).collect();
        ids.sort();
        let mut expected = vec![a.id(), b.id()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn membership_stops_sending_after_leave() {
        let registry = RoomRegistry::new();
        let (conn, mut rx) = Connection::channel(4);
        registry.join("lobby", &conn).unwrap();
        let snapshot = registry.memberships("lobby");

        registry.leave("lobby", conn.id()).await;

        let outcome = snapshot[0]
            .send_if_member(Arc::from("late"), &DeliveryPolicy::default())
            .await;
        assert!(outcome.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_joins_on_many_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        let mut receivers = Vec::new();

        for i in 0..32 {
            let (conn, rx) = Connection::channel(1);
            receivers.push(rx);
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.join(&format!("room-{}", i % 4), &conn).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.room_count(), 4);
        for i in 0..4 {
            assert_eq!(registry.member_count(&format!("room-{}", i)), 8);
        }
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = Connection::channel(4);
        let (b, _rx_b) = Connection::channel(4);
        registry.join("one", &a).unwrap();
        registry.join("two", &b).unwrap();
        let snapshot = registry.memberships("one");

        registry.clear().await;

        assert_eq!(registry.room_count(), 0);
        let outcome = snapshot[0]
            .send_if_member(Arc::from("late"), &DeliveryPolicy::default())
            .await;
        assert!(outcome.is_none());
    }
}
