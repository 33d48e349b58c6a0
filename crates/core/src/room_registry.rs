use std::collections::HashSet;

use dashmap::DashMap;

use crate::ids::{PeerId, RoomId};

struct Membership {
    peers: HashSet<PeerId>,
    owner: Option<PeerId>,
}

/// Room id → peer set + ownership record. Kept separate from the Router
/// Registry: a room's membership/ownership and its media router have
/// different lifetimes from the registry's point of view even though they
/// collapse together (see `RouterRegistry::cleanup`, driven by the Cleanup
/// Coordinator once this registry reports the room empty).
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Membership>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Adds `peer_id` to `room_id`'s membership set, creating the room and
    /// marking `peer_id` as owner if it is the first joiner. Returns
    /// `(is_owner, participant_snapshot_excluding_self)`.
    ///
    /// The whole add-then-snapshot sequence runs under the `DashMap` shard
    /// lock for this room id, so a concurrent second join is fully
    /// serialized ahead of or behind this one — it can never observe a torn
    /// state (spec open question: "specify a total order").
    pub fn join(&self, room_id: &RoomId, peer_id: PeerId) -> (bool, Vec<PeerId>) {
        let mut entry = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Membership {
                peers: HashSet::new(),
                owner: None,
            });

        let is_owner = entry.owner.is_none();
        if is_owner {
            entry.owner = Some(peer_id);
        }

        let existing: Vec<PeerId> = entry.peers.iter().copied().collect();
        entry.peers.insert(peer_id);

        (is_owner, existing)
    }

    /// Removes `peer_id` from its room. Returns `true` if the room is now
    /// empty (the caller should collapse the router and drop this entry).
    pub fn leave(&self, room_id: &RoomId, peer_id: PeerId) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room_id) else {
            return false;
        };
        entry.peers.remove(&peer_id);
        entry.peers.is_empty()
    }

    pub fn drop_room(&self, room_id: &RoomId) {
        self.rooms.remove(room_id);
    }

    pub fn is_owner(&self, room_id: &RoomId, peer_id: PeerId) -> bool {
        self.rooms
            .get(room_id)
            .map(|e| e.owner == Some(peer_id))
            .unwrap_or(false)
    }

    pub fn owner(&self, room_id: &RoomId) -> Option<PeerId> {
        self.rooms.get(room_id).and_then(|e| e.owner)
    }

    pub fn peer_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map(|e| e.peers.len()).unwrap_or(0)
    }

    pub fn peers(&self, room_id: &RoomId) -> Vec<PeerId> {
        self.rooms
            .get(room_id)
            .map(|e| e.peers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_joiner_is_owner_and_sees_empty_participants() {
        let reg = RoomRegistry::new();
        let alice = PeerId::new();
        let (is_owner, existing) = reg.join(&"room-A".to_string(), alice);
        assert!(is_owner);
        assert!(existing.is_empty());
    }

    #[test]
    fn second_joiner_is_not_owner_and_sees_first() {
        let reg = RoomRegistry::new();
        let room = "room-A".to_string();
        let alice = PeerId::new();
        let bob = PeerId::new();
        reg.join(&room, alice);
        let (is_owner, existing) = reg.join(&room, bob);
        assert!(!is_owner);
        assert_eq!(existing, vec![alice]);
    }

    #[test]
    fn ownership_never_transfers_on_leave() {
        let reg = RoomRegistry::new();
        let room = "room-A".to_string();
        let alice = PeerId::new();
        let bob = PeerId::new();
        reg.join(&room, alice);
        reg.join(&room, bob);
        let emptied = reg.leave(&room, alice);
        assert!(!emptied);
        // Owner record is untouched even though the owner left.
        assert_eq!(reg.owner(&room), Some(alice));
        assert!(!reg.is_owner(&room, bob));
    }

    #[test]
    fn room_reports_empty_after_last_peer_leaves() {
        let reg = RoomRegistry::new();
        let room = "room-A".to_string();
        let alice = PeerId::new();
        reg.join(&room, alice);
        assert!(reg.leave(&room, alice));
    }
}
