use std::{collections::HashMap, time::Duration};

use comms::transport::Payload;
use futures_util::future::join_all;

use super::member_handle::{ConnectionId, DeliveryError, MemberHandle};

/// Result of handing a payload to every other member of a room
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Number of members the payload was queued for
    pub delivered: usize,
    /// Members which could not take the payload, they have been evicted
    pub failed: Vec<(ConnectionId, DeliveryError)>,
}

#[derive(Debug, Default)]
/// [Room] holds the members of a single room.
///
/// A room only exists while it has members, the [crate::room_manager::RoomManager] removes it
/// together with its last member.
pub struct Room {
    members: HashMap<ConnectionId, MemberHandle>,
}

impl Room {
    pub fn new() -> Self {
        Room {
            members: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a member to the room, replacing a previous handle with the same connection id
    pub fn insert(&mut self, member: MemberHandle) {
        self.members.insert(member.connection_id().clone(), member);
    }

    /// Remove a member from the room
    /// Does nothing and returns None if the member is not in the room
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<MemberHandle> {
        self.members.remove(connection_id)
    }

    /// Snapshot of the members a broadcast from `origin` goes to.
    ///
    /// The origin and members which are already being evicted are left out.
    pub fn peers(&self, origin: &ConnectionId) -> Vec<MemberHandle> {
        self.members
            .values()
            .filter(|member| member.connection_id() != origin && !member.is_evicted())
            .cloned()
            .collect()
    }
}

/// Hand the payload to every peer at once, waiting at most `grace` on each of them.
///
/// A peer which can not take the payload in time is evicted,
/// delivery to the remaining peers is not affected.
pub async fn deliver_to(
    peers: Vec<MemberHandle>,
    payload: &Payload,
    grace: Duration,
) -> BroadcastOutcome {
    let results = join_all(peers.iter().map(|peer| peer.deliver(payload.clone(), grace))).await;

    let mut outcome = BroadcastOutcome::default();
    for (peer, result) in peers.iter().zip(results) {
        match result {
            Ok(()) => outcome.delivered += 1,
            Err(err) => {
                peer.evict();
                outcome.failed.push((peer.connection_id().clone(), err));
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    const GRACE: Duration = Duration::from_millis(50);

    fn member(id: &str, capacity: usize) -> (MemberHandle, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);

        (
            MemberHandle::new(ConnectionId::from(id), tx, CancellationToken::new()),
            rx,
        )
    }

    fn payload(text: &str) -> Payload {
        Payload::from(String::from(text))
    }

    fn ids(peers: &[MemberHandle]) -> Vec<String> {
        let mut ids: Vec<String> = peers
            .iter()
            .map(|peer| peer.connection_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_peers_skip_origin_and_evicted_members() {
        let mut room = Room::new();
        let (a, _a_rx) = member("a", 4);
        let (b, _b_rx) = member("b", 4);
        let (c, _c_rx) = member("c", 4);
        room.insert(a);
        room.insert(b);
        room.insert(c.clone());

        assert_eq!(ids(&room.peers(&ConnectionId::from("a"))), vec!["b", "c"]);

        c.evict();
        assert_eq!(ids(&room.peers(&ConnectionId::from("a"))), vec!["b"]);
    }

    #[tokio::test]
    async fn test_deliver_to_isolates_failed_member() {
        let (dead, dead_rx) = member("dead", 4);
        let (y, mut y_rx) = member("y", 4);
        let (z, mut z_rx) = member("z", 4);
        drop(dead_rx);

        let outcome = deliver_to(vec![dead.clone(), y, z], &payload("m"), GRACE).await;

        assert_eq!(outcome.delivered, 2);
        assert_eq!(
            outcome.failed,
            vec![(ConnectionId::from("dead"), DeliveryError::Disconnected)]
        );
        assert!(dead.is_evicted());
        assert_eq!(y_rx.try_recv().unwrap().as_str(), "m");
        assert_eq!(z_rx.try_recv().unwrap().as_str(), "m");
    }

    #[tokio::test]
    async fn test_member_still_full_after_grace_is_evicted() {
        let (slow, _slow_rx) = member("slow", 1);
        let (fast, mut fast_rx) = member("fast", 4);

        let first = deliver_to(vec![slow.clone(), fast.clone()], &payload("1"), GRACE).await;
        let second = deliver_to(vec![slow.clone(), fast.clone()], &payload("2"), GRACE).await;

        assert_eq!(first.delivered, 2);
        assert!(first.failed.is_empty());
        assert_eq!(second.delivered, 1);
        assert_eq!(
            second.failed,
            vec![(ConnectionId::from("slow"), DeliveryError::Lagging)]
        );
        assert!(slow.is_evicted());
        assert!(!fast.is_evicted());
        assert_eq!(fast_rx.try_recv().unwrap().as_str(), "1");
        assert_eq!(fast_rx.try_recv().unwrap().as_str(), "2");
    }

    #[tokio::test]
    async fn test_member_draining_within_grace_is_kept() {
        let (reader, mut rx) = member("reader", 1);
        let grace = Duration::from_secs(5);

        // the queue is full, the reader frees a slot shortly after
        reader.deliver(payload("1"), grace).await.unwrap();
        let drained = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut received = Vec::new();
            while let Some(payload) = rx.recv().await {
                received.push(String::from(payload.as_str()));
            }
            received
        });

        let outcome = deliver_to(vec![reader.clone()], &payload("2"), grace).await;
        assert_eq!(outcome.delivered, 1);
        assert!(!reader.is_evicted());

        drop(reader);
        assert_eq!(drained.await.unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut room = Room::new();
        let (a, _a_rx) = member("a", 1);
        room.insert(a);

        assert!(room.remove(&ConnectionId::from("a")).is_some());
        assert!(room.remove(&ConnectionId::from("a")).is_none());
        assert!(room.is_empty());
    }
}
