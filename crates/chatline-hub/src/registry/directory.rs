//! The user-id to connections directory.
//!
//! Only the registry task touches a [`Directory`]; nothing here is shared or
//! locked.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionId, SendResult};
use crate::protocol::OutboundFrame;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was queued for
    pub delivered: usize,
    /// Connections removed because their queue was full or closed
    pub evicted: Vec<ConnectionId>,
}

/// Point-in-time view of directory membership.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySnapshot {
    pub users: BTreeMap<String, Vec<ConnectionId>>,
}

impl DirectorySnapshot {
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }

    /// Connection ids registered under a user, empty if none.
    pub fn connections_for(&self, user_id: &str) -> &[ConnectionId] {
        self.users.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.users.values().any(|ids| ids.contains(&id))
    }
}

/// Connections grouped by the user id they claimed.
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<String, Vec<ConnectionHandle>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Several connections per user are allowed.
    pub fn insert(&mut self, handle: ConnectionHandle) {
        self.users
            .entry(handle.user_id().to_string())
            .or_default()
            .push(handle);
    }

    /// Remove a connection, dropping its handle and closing its queue.
    ///
    /// Returns false when the connection was not present (already removed
    /// or evicted).
    pub fn remove(&mut self, user_id: &str, id: ConnectionId) -> bool {
        let Some(bucket) = self.users.get_mut(user_id) else {
            return false;
        };
        let Some(index) = bucket.iter().position(|handle| handle.id() == id) else {
            return false;
        };
        bucket.swap_remove(index);
        if bucket.is_empty() {
            self.users.remove(user_id);
        }
        true
    }

    /// Queue a frame for every connection, evicting those that cannot take it.
    pub fn broadcast(&mut self, frame: &OutboundFrame) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        self.users.retain(|_, bucket| {
            bucket.retain(|handle| deliver_or_evict(handle, frame, &mut report));
            !bucket.is_empty()
        });
        report
    }

    /// Queue a frame for every connection of the given users, except `origin`.
    ///
    /// Duplicate user ids are delivered to once.
    pub fn send_to<S: AsRef<str>>(
        &mut self,
        participants: &[S],
        origin: Option<ConnectionId>,
        frame: &OutboundFrame,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut seen = HashSet::new();

        for user_id in participants.iter().map(AsRef::as_ref) {
            if !seen.insert(user_id) {
                continue;
            }
            let Some(bucket) = self.users.get_mut(user_id) else {
                debug!(user_id = %user_id, "Participant has no live connections");
                continue;
            };
            bucket.retain(|handle| {
                if Some(handle.id()) == origin {
                    return true;
                }
                deliver_or_evict(handle, frame, &mut report)
            });
            if bucket.is_empty() {
                self.users.remove(user_id);
            }
        }
        report
    }

    /// Remove every connection, closing all queues. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.connection_count();
        self.users.clear();
        count
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.users
            .values()
            .any(|bucket| bucket.iter().any(|handle| handle.id() == id))
    }

    pub fn connection_count(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        let users = self
            .users
            .iter()
            .map(|(user_id, bucket)| {
                let mut ids: Vec<_> = bucket.iter().map(ConnectionHandle::id).collect();
                ids.sort();
                (user_id.clone(), ids)
            })
            .collect();
        DirectorySnapshot { users }
    }
}

/// Returns whether the handle stays in the directory.
fn deliver_or_evict(
    handle: &ConnectionHandle,
    frame: &OutboundFrame,
    report: &mut DeliveryReport,
) -> bool {
    match handle.try_deliver(frame.clone()) {
        SendResult::Sent => {
            report.delivered += 1;
            true
        }
        SendResult::ChannelFull => {
            warn!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                "Outbound queue full, evicting connection"
            );
            report.evicted.push(handle.id());
            false
        }
        SendResult::ChannelClosed => {
            debug!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                "Outbound queue closed, evicting connection"
            );
            report.evicted.push(handle.id());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(
        directory: &mut Directory,
        user_id: &str,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(capacity);
        directory.insert(ConnectionHandle::new(id, user_id, tx));
        (id, rx)
    }

    #[test]
    fn test_insert_allows_multiple_connections_per_user() {
        let mut directory = Directory::new();
        let (a1, _rx1) = connect(&mut directory, "alice", 4);
        let (a2, _rx2) = connect(&mut directory, "alice", 4);

        assert_eq!(directory.user_count(), 1);
        assert_eq!(directory.connection_count(), 2);
        assert!(directory.contains(a1));
        assert!(directory.contains(a2));
    }

    #[test]
    fn test_remove_closes_queue_and_drops_empty_bucket() {
        let mut directory = Directory::new();
        let (id, mut rx) = connect(&mut directory, "alice", 4);

        assert!(directory.remove("alice", id));
        assert_eq!(directory.user_count(), 0);
        assert!(rx.try_recv().is_err());
        assert!(rx.is_closed());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut directory = Directory::new();
        let (id, _rx) = connect(&mut directory, "alice", 4);

        assert!(directory.remove("alice", id));
        assert!(!directory.remove("alice", id));
        assert!(!directory.remove("bob", ConnectionId::new()));
    }

    #[test]
    fn test_broadcast_evicts_full_connection() {
        let mut directory = Directory::new();
        let (_a1, mut rx1) = connect(&mut directory, "alice", 4);
        let (full, mut rx_full) = connect(&mut directory, "alice", 1);
        let (_a3, mut rx3) = connect(&mut directory, "alice", 4);

        // Fill the one-slot queue ahead of the broadcast.
        let first = directory.broadcast(&OutboundFrame::new("warmup"));
        assert_eq!(first.delivered, 3);
        rx1.try_recv().unwrap();
        rx3.try_recv().unwrap();

        let report = directory.broadcast(&OutboundFrame::new("hello"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![full]);
        assert!(!directory.contains(full));
        assert_eq!(directory.connection_count(), 2);

        assert_eq!(rx1.try_recv().unwrap().as_str(), "hello");
        assert_eq!(rx3.try_recv().unwrap().as_str(), "hello");
        assert_eq!(rx_full.try_recv().unwrap().as_str(), "warmup");
        assert!(rx_full.try_recv().is_err());
        assert!(rx_full.is_closed());
    }

    #[test]
    fn test_broadcast_evicts_closed_connection() {
        let mut directory = Directory::new();
        let (gone, rx) = connect(&mut directory, "bob", 4);
        drop(rx);

        let report = directory.broadcast(&OutboundFrame::new("hello"));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.evicted, vec![gone]);
        assert_eq!(directory.user_count(), 0);
    }

    #[test]
    fn test_send_to_skips_origin() {
        let mut directory = Directory::new();
        let (a1, mut rx_a1) = connect(&mut directory, "alice", 4);
        let (_a2, mut rx_a2) = connect(&mut directory, "alice", 4);
        let (_b1, mut rx_b1) = connect(&mut directory, "bob", 4);
        let (_c1, mut rx_c1) = connect(&mut directory, "carol", 4);

        let report = directory.send_to(
            &["alice", "bob", "alice"],
            Some(a1),
            &OutboundFrame::new("event"),
        );

        assert_eq!(report.delivered, 2);
        assert!(rx_a1.try_recv().is_err());
        assert_eq!(rx_a2.try_recv().unwrap().as_str(), "event");
        assert!(rx_a2.try_recv().is_err());
        assert_eq!(rx_b1.try_recv().unwrap().as_str(), "event");
        assert!(rx_c1.try_recv().is_err());
    }

    #[test]
    fn test_send_to_evicts_full_participant() {
        let mut directory = Directory::new();
        let (b1, mut rx_b1) = connect(&mut directory, "bob", 1);
        directory.send_to(&["bob"], None, &OutboundFrame::new("first"));

        let report = directory.send_to(&["bob"], None, &OutboundFrame::new("second"));
        assert_eq!(report.evicted, vec![b1]);
        assert_eq!(directory.user_count(), 0);
        assert_eq!(rx_b1.try_recv().unwrap().as_str(), "first");
    }

    #[test]
    fn test_snapshot_and_clear() {
        let mut directory = Directory::new();
        let (a1, _rx1) = connect(&mut directory, "alice", 4);
        let (b1, _rx2) = connect(&mut directory, "bob", 4);

        let snapshot = directory.snapshot();
        assert_eq!(snapshot.user_count(), 2);
        assert_eq!(snapshot.connection_count(), 2);
        assert_eq!(snapshot.connections_for("alice"), &[a1]);
        assert!(snapshot.contains(b1));
        assert!(snapshot.connections_for("carol").is_empty());

        assert_eq!(directory.clear(), 2);
        assert_eq!(directory.snapshot(), DirectorySnapshot::default());
    }
}
