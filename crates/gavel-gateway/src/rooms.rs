//! Auction room registry.
//!
//! Each joined connection holds an outbound channel in the room's member
//! map; the fabric pump feeds cross-instance events into local broadcast so
//! a message published on any instance reaches every room member here.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use gavel_core::types::AuctionId;
use gavel_kv::{FabricEvent, KvStore};

/// Process-unique connection id.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Sender half of one connection's outbound frame queue.
pub type FrameSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<AuctionId, DashMap<ConnId, FrameSender>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, auction_id: AuctionId, conn: ConnId, sender: FrameSender) {
        self.rooms.entry(auction_id).or_default().insert(conn, sender);
    }

    pub fn leave(&self, auction_id: AuctionId, conn: ConnId) {
        if let Some(room) = self.rooms.get(&auction_id) {
            room.remove(&conn);
        }
        self.rooms.remove_if(&auction_id, |_, room| room.is_empty());
    }

    /// Defense in depth on disconnect: drop the connection from every room
    /// it ever joined.
    pub fn leave_all(&self, conn: ConnId) {
        for room in self.rooms.iter() {
            room.value().remove(&conn);
        }
        self.rooms.retain(|_, room| !room.is_empty());
    }

    pub fn watcher_count(&self, auction_id: AuctionId) -> i64 {
        self.rooms.get(&auction_id).map(|r| r.len() as i64).unwrap_or(0)
    }

    pub fn is_member(&self, auction_id: AuctionId, conn: ConnId) -> bool {
        self.rooms
            .get(&auction_id)
            .map(|r| r.contains_key(&conn))
            .unwrap_or(false)
    }

    /// Fan a serialized frame out to every member of one room. Dead senders
    /// are pruned on the way.
    pub fn broadcast_local(&self, auction_id: AuctionId, payload: &str) {
        let Some(room) = self.rooms.get(&auction_id) else {
            return;
        };
        let mut dead = Vec::new();
        for member in room.iter() {
            if member.value().send(payload.to_string()).is_err() {
                dead.push(*member.key());
            }
        }
        for conn in dead {
            room.remove(&conn);
        }
    }
}

/// Bridge the cross-instance fabric into local rooms. One task per process.
pub fn spawn_fabric_pump(
    kv: KvStore,
    rooms: std::sync::Arc<RoomRegistry>,
) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<FabricEvent>(256);
    let subscriber = gavel_kv::spawn_subscriber(kv, tx);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!(auction_id = %event.auction_id, "fabric event");
            rooms.broadcast_local(event.auction_id, &event.payload);
        }
        subscriber.abort();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> AuctionId {
        AuctionId::new()
    }

    #[test]
    fn join_broadcast_leave() {
        let rooms = RoomRegistry::new();
        let auction = id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();

        rooms.join(auction, conn, tx);
        assert_eq!(rooms.watcher_count(auction), 1);
        assert!(rooms.is_member(auction, conn));

        rooms.broadcast_local(auction, "hello");
        assert_eq!(rx.try_recv().unwrap(), "hello");

        rooms.leave(auction, conn);
        assert_eq!(rooms.watcher_count(auction), 0);
        assert!(!rooms.is_member(auction, conn));
    }

    #[test]
    fn leave_all_clears_every_room() {
        let rooms = RoomRegistry::new();
        let (a, b) = (id(), id());
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();
        rooms.join(a, conn, tx.clone());
        rooms.join(b, conn, tx);
        rooms.leave_all(conn);
        assert_eq!(rooms.watcher_count(a), 0);
        assert_eq!(rooms.watcher_count(b), 0);
    }

    #[test]
    fn dead_members_are_pruned_on_broadcast() {
        let rooms = RoomRegistry::new();
        let auction = id();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();
        rooms.join(auction, conn, tx);
        drop(rx);
        rooms.broadcast_local(auction, "x");
        assert_eq!(rooms.watcher_count(auction), 0);
    }

    #[test]
    fn broadcast_to_unknown_room_is_a_noop() {
        let rooms = RoomRegistry::new();
        rooms.broadcast_local(id(), "x");
    }
}
