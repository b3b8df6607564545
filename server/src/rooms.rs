// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Live room membership for real-time connections.
//!
//! Rooms are keyed by group id but are independent of persisted group
//! membership: a connection is in a room only while it is connected and
//! after it explicitly joined. Nothing here is ever written to the store.
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use streak_common::{RejectReason, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type RoomId = i64;

/// Identifier of one live connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Outbound>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

/// Tracks which connections are in which rooms and fans events out to them.
///
/// Critical sections are short and never await: broadcast snapshots the
/// member senders under a read lock and delivers after releasing it.
#[derive(Default)]
pub struct RoomRegistry {
    next_id: AtomicU64,
    inner: RwLock<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection's outbound channel and hands out its id.
    pub fn connect(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.inner.write().connections.insert(id, outbound);
        debug!(connection = %id, "connection registered");
        id
    }

    /// Adds `connection` to `room`. Returns false if it was already a member.
    pub fn join(&self, connection: ConnectionId, room: RoomId) -> Result<bool, RoomError> {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(&connection) {
            return Err(RoomError::UnknownConnection(connection));
        }
        let added = inner.rooms.entry(room).or_default().insert(connection);
        inner.memberships.entry(connection).or_default().insert(room);
        Ok(added)
    }

    /// Removes `connection` from `room`. Returns false if it was not a member.
    pub fn leave(&self, connection: ConnectionId, room: RoomId) -> bool {
        let mut inner = self.inner.write();
        let removed = match inner.rooms.get_mut(&room) {
            Some(members) => {
                let removed = members.remove(&connection);
                if members.is_empty() {
                    inner.rooms.remove(&room);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = inner.memberships.get_mut(&connection) {
            rooms.remove(&room);
        }
        removed
    }

    pub fn is_member(&self, connection: ConnectionId, room: RoomId) -> bool {
        self.inner
            .read()
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains(&connection))
    }

    pub fn room_size(&self, room: RoomId) -> usize {
        self.inner.read().rooms.get(&room).map_or(0, HashSet::len)
    }

    /// Rooms `connection` is currently in.
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .inner
            .read()
            .memberships
            .get(&connection)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort_unstable();
        rooms
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Delivers `event` once to every connection currently in `room`,
    /// returning how many accepted it.
    ///
    /// A closed receiver is logged and skipped; delivery is not retried.
    pub fn broadcast(&self, room: RoomId, event: &ServerEvent) -> usize {
        let targets: Vec<(ConnectionId, Outbound)> = {
            let inner = self.inner.read();
            let Some(members) = inner.rooms.get(&room) else {
                return 0;
            };
            members
                .iter()
                .filter_map(|id| inner.connections.get(id).map(|tx| (*id, tx.clone())))
                .collect()
        };

        let mut delivered = 0;
        for (connection, outbound) in targets {
            if outbound.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    connection = %connection,
                    room,
                    code = %RejectReason::TransportFailure,
                    "broadcast target unreachable"
                );
            }
        }
        delivered
    }

    /// Forgets `connection` entirely and removes it from every room it was in.
    /// Returns the rooms it left.
    pub fn drop_connection(&self, connection: ConnectionId) -> Vec<RoomId> {
        let mut inner = self.inner.write();
        inner.connections.remove(&connection);
        let mut left: Vec<RoomId> = inner
            .memberships
            .remove(&connection)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &left {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&connection);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
        drop(inner);

        left.sort_unstable();
        debug!(connection = %connection, rooms = ?left, "connection dropped");
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn open(registry: &RoomRegistry) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.connect(tx), rx)
    }

    fn joined(group_id: i64) -> ServerEvent {
        ServerEvent::Joined { group_id }
    }

    #[test]
    fn test_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = open(&registry);

        assert_eq!(registry.join(conn, 1), Ok(true));
        assert_eq!(registry.join(conn, 1), Ok(false));
        assert_eq!(registry.room_size(1), 1);
        assert!(registry.is_member(conn, 1));
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = open(&registry);

        assert!(!registry.leave(conn, 1));
        registry.join(conn, 1).unwrap();
        assert!(registry.leave(conn, 1));
        assert!(!registry.leave(conn, 1));
        assert_eq!(registry.room_size(1), 0);
    }

    #[test]
    fn test_join_unknown_connection_fails() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = open(&registry);
        registry.drop_connection(conn);

        assert_eq!(
            registry.join(conn, 1),
            Err(RoomError::UnknownConnection(conn))
        );
    }

    #[test]
    fn test_broadcast_reaches_members_and_sender_only() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = open(&registry);
        let (bob, mut bob_rx) = open(&registry);
        let (carol, mut carol_rx) = open(&registry);

        registry.join(alice, 1).unwrap();
        registry.join(bob, 1).unwrap();
        registry.join(carol, 2).unwrap();

        assert_eq!(registry.broadcast(1, &joined(1)), 2);

        assert_eq!(alice_rx.try_recv().unwrap(), joined(1));
        assert_eq!(bob_rx.try_recv().unwrap(), joined(1));
        assert!(carol_rx.try_recv().is_err());
        // Exactly one copy per member.
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_left_connection_gets_nothing() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = open(&registry);
        let (bob, mut bob_rx) = open(&registry);
        registry.join(alice, 1).unwrap();
        registry.join(bob, 1).unwrap();

        registry.leave(bob, 1);
        assert_eq!(registry.broadcast(1, &joined(1)), 1);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_connection_clears_every_room() {
        let registry = RoomRegistry::new();
        let (alice, mut alice_rx) = open(&registry);
        let (bob, _bob_rx) = open(&registry);
        for room in [1, 2, 3] {
            registry.join(alice, room).unwrap();
        }
        registry.join(bob, 2).unwrap();

        assert_eq!(registry.rooms_of(alice), vec![1, 2, 3]);
        assert_eq!(registry.drop_connection(alice), vec![1, 2, 3]);

        assert_eq!(registry.room_size(1), 0);
        assert_eq!(registry.room_size(2), 1);
        assert!(registry.rooms_of(alice).is_empty());
        assert_eq!(registry.connection_count(), 1);

        registry.broadcast(2, &joined(2));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_closed_receivers() {
        let registry = RoomRegistry::new();
        let (alice, alice_rx) = open(&registry);
        let (bob, mut bob_rx) = open(&registry);
        registry.join(alice, 1).unwrap();
        registry.join(bob, 1).unwrap();
        drop(alice_rx);

        assert_eq!(registry.broadcast(1, &joined(1)), 1);
        assert!(bob_rx.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_to_empty_room() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.broadcast(9, &joined(9)), 0);
    }

    #[test]
    fn test_broadcast_preserves_send_order() {
        let registry = RoomRegistry::new();
        let (alice, _alice_rx) = open(&registry);
        let (bob, mut bob_rx) = open(&registry);
        registry.join(alice, 1).unwrap();
        registry.join(bob, 1).unwrap();

        for group_id in 0..20 {
            registry.broadcast(1, &ServerEvent::Left { group_id });
        }
        for group_id in 0..20 {
            assert_eq!(bob_rx.try_recv().unwrap(), ServerEvent::Left { group_id });
        }
    }

    #[test]
    fn test_concurrent_joins_and_drops() {
        let registry = std::sync::Arc::new(RoomRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let conn = registry.connect(tx);
                    for _ in 0..100 {
                        registry.join(conn, 1).unwrap();
                        registry.broadcast(1, &ServerEvent::Joined { group_id: 1 });
                        registry.leave(conn, 1);
                    }
                    registry.join(conn, 1).unwrap();
                    conn
                })
            })
            .collect();
        let conns: Vec<ConnectionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.room_size(1), 8);
        for conn in conns {
            registry.drop_connection(conn);
        }
        assert_eq!(registry.room_size(1), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}
