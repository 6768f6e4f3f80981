use std::{sync::Arc, time::Duration};

use comms::{transport::Payload, RoomKey};
use dashmap::DashMap;

use super::room::{deliver_to, ConnectionId, MemberHandle, Room};

#[derive(Debug)]
/// [RoomManager] is the registry of every live room.
///
/// Rooms are created on the first join and removed together with their last member.
/// Each room entry is guarded by its map shard. The guard is only held for in-memory
/// bookkeeping, so join, leave and broadcast of one room never wait on another.
pub struct RoomManager {
    rooms: DashMap<RoomKey, Room>,
    delivery_grace: Duration,
}

impl RoomManager {
    /// # Arguments
    ///
    /// - `delivery_grace` - How long a broadcast waits for a member with a full queue before evicting it
    pub fn new(delivery_grace: Duration) -> Self {
        RoomManager {
            rooms: DashMap::new(),
            delivery_grace,
        }
    }

    /// Joins a room with the given member, creating the room if it does not exist yet
    ///
    /// # Returns
    ///
    /// - A [Membership] for the member to broadcast to the room, which departs the room when dropped
    pub fn join(self: &Arc<Self>, room_key: RoomKey, member: MemberHandle) -> Membership {
        let connection_id = member.connection_id().clone();

        {
            // the entry guard makes the existence check and the insert one step with respect to leave
            let mut room = self.rooms.entry(room_key.clone()).or_insert_with(|| {
                log::info!("room '{}' created", room_key);
                Room::new()
            });

            room.insert(member);
            log::debug!(
                "connection {} joined room '{}', {} member(s)",
                connection_id,
                room_key,
                room.len()
            );
        }

        Membership {
            room_manager: Arc::clone(self),
            room_key,
            connection_id,
            departed: false,
        }
    }

    /// Removes a connection from a room, and the room itself if it was the last member.
    ///
    /// Returns true if the connection was a member. Leaving twice is harmless,
    /// the second call returns false.
    pub fn leave(&self, room_key: &RoomKey, connection_id: &ConnectionId) -> bool {
        let mut removed = false;

        let room_removed = self
            .rooms
            .remove_if_mut(room_key, |_, room| {
                removed = room.remove(connection_id).is_some();
                room.is_empty()
            })
            .is_some();

        if removed {
            log::debug!("connection {} left room '{}'", connection_id, room_key);
        }
        if room_removed {
            log::info!("room '{}' removed, last member left", room_key);
        }

        removed
    }

    /// Hands a payload to every member of the room except the origin.
    ///
    /// Members are snapshotted under the room guard, the payload is queued for them after
    /// the guard is released. A member whose queue stays full for the delivery grace, or whose
    /// connection is gone, is evicted without affecting the others. Nothing is reported back
    /// to the origin. Broadcasting to a room which does not exist is a no-op.
    ///
    /// Completes once the payload is queued for every member which was not evicted,
    /// so the origin's next broadcast is never queued ahead of this one.
    ///
    /// Returns the number of members the payload was queued for.
    pub async fn broadcast(
        &self,
        room_key: &RoomKey,
        origin: &ConnectionId,
        payload: &Payload,
    ) -> usize {
        let peers = match self.rooms.get(room_key) {
            Some(room) => room.peers(origin),
            None => return 0,
        };

        let outcome = deliver_to(peers, payload, self.delivery_grace).await;

        for (connection_id, err) in outcome.failed.iter() {
            log::warn!(
                "could not relay message from {} to {} in room '{}': {}, evicting it",
                origin,
                connection_id,
                room_key,
                err
            );
        }

        outcome.delivered
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, room_key: &RoomKey) -> bool {
        self.rooms.contains_key(room_key)
    }

    /// Number of members in a room, zero for a room which does not exist
    pub fn member_count(&self, room_key: &RoomKey) -> usize {
        self.rooms.get(room_key).map_or(0, |room| room.len())
    }
}

#[derive(Debug)]
/// [Membership] is handed out to a connection when it joins a room.
///
/// It is the connection's only way to broadcast to the room. Departure runs exactly once,
/// either through [Membership::leave] or when the membership is dropped.
pub struct Membership {
    room_manager: Arc<RoomManager>,
    room_key: RoomKey,
    connection_id: ConnectionId,
    departed: bool,
}

impl Membership {
    pub fn room_key(&self) -> &RoomKey {
        &self.room_key
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Send a payload to the other members of the room, see [RoomManager::broadcast]
    pub async fn broadcast(&self, payload: &Payload) -> usize {
        self.room_manager
            .broadcast(&self.room_key, &self.connection_id, payload)
            .await
    }

    /// Leave the room, consuming the membership
    pub fn leave(mut self) -> bool {
        self.depart()
    }

    fn depart(&mut self) -> bool {
        if self.departed {
            return false;
        }
        self.departed = true;

        self.room_manager.leave(&self.room_key, &self.connection_id)
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.depart();
    }
}
