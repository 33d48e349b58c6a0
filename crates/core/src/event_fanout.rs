use crate::ids::{PeerId, RoomId};
use crate::peer_registry::PeerRegistry;
use crate::protocol::ServerEvent;
use crate::room_registry::RoomRegistry;

/// Broadcasts room events to connected peers. Delivery is best-effort: a
/// recipient whose channel has already gone away is silently skipped, the
/// way the spec's "broadcasts are never aborted by recipient-side failures"
/// requires.
pub struct EventFanout<'a> {
    rooms: &'a RoomRegistry,
    peers: &'a PeerRegistry,
}

impl<'a> EventFanout<'a> {
    pub fn new(rooms: &'a RoomRegistry, peers: &'a PeerRegistry) -> Self {
        Self { rooms, peers }
    }

    pub async fn to_room_except_sender(
        &self,
        room_id: &RoomId,
        sender: PeerId,
        event: ServerEvent,
    ) {
        for peer_id in self.rooms.peers(room_id) {
            if peer_id == sender {
                continue;
            }
            if let Some(peer) = self.peers.get(peer_id) {
                peer.channel.send(event.clone()).await;
            }
        }
    }

    pub async fn to_room_including_sender(&self, room_id: &RoomId, event: ServerEvent) {
        for peer_id in self.rooms.peers(room_id) {
            if let Some(peer) = self.peers.get(peer_id) {
                peer.channel.send(event.clone()).await;
            }
        }
    }

    pub async fn to_peer(&self, peer_id: PeerId, event: ServerEvent) {
        send_to_peer(self.peers, peer_id, event).await;
    }
}

/// Standalone peer-targeted send, usable from a `'static` spawned task (e.g.
/// a mediasoup observer callback) that only holds an `Arc<PeerRegistry>` and
/// has no room context.
pub async fn send_to_peer(peers: &PeerRegistry, peer_id: PeerId, event: ServerEvent) {
    if let Some(peer) = peers.get(peer_id) {
        peer.channel.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::peer_registry::{PeerChannel, PeerState};

    struct RecordingChannel {
        count: AtomicUsize,
    }

    #[async_trait]
    impl PeerChannel for RecordingChannel {
        async fn send(&self, _event: ServerEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peer_with_channel(room_id: &str) -> (PeerId, Arc<RecordingChannel>, PeerState) {
        let peer_id = PeerId::new();
        let channel = Arc::new(RecordingChannel {
            count: AtomicUsize::new(0),
        });
        let state = PeerState::new(
            peer_id,
            "user".into(),
            "name".into(),
            room_id.to_string(),
            channel.clone(),
            false,
        );
        (peer_id, channel, state)
    }

    #[tokio::test]
    async fn except_sender_skips_the_sender_only() {
        let rooms = RoomRegistry::new();
        let peers = PeerRegistry::new();
        let room = "room-A".to_string();

        let (alice, alice_chan, alice_state) = peer_with_channel(&room);
        let (bob, bob_chan, bob_state) = peer_with_channel(&room);
        rooms.join(&room, alice);
        rooms.join(&room, bob);
        peers.insert(alice_state);
        peers.insert(bob_state);

        let fanout = EventFanout::new(&rooms, &peers);
        fanout
            .to_room_except_sender(
                &room,
                alice,
                ServerEvent::MeetingEnded {
                    reason: "test".into(),
                },
            )
            .await;

        assert_eq!(alice_chan.count.load(Ordering::SeqCst), 0);
        assert_eq!(bob_chan.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn including_sender_reaches_everyone() {
        let rooms = RoomRegistry::new();
        let peers = PeerRegistry::new();
        let room = "room-A".to_string();

        let (alice, alice_chan, alice_state) = peer_with_channel(&room);
        rooms.join(&room, alice);
        peers.insert(alice_state);

        let fanout = EventFanout::new(&rooms, &peers);
        fanout
            .to_room_including_sender(
                &room,
                ServerEvent::MeetingEnded {
                    reason: "test".into(),
                },
            )
            .await;

        assert_eq!(alice_chan.count.load(Ordering::SeqCst), 1);
    }
}
