use tracing::debug;

use crate::event_fanout::EventFanout;
use crate::ids::PeerId;
use crate::peer_registry::PeerRegistry;
use crate::protocol::ServerEvent;
use crate::room_registry::RoomRegistry;
use crate::router_registry::RouterRegistry;

/// Cascades the closure of one peer's resources and, if that empties the
/// room, the room's router and membership records. The whole sequence is the
/// literal 6-step cascade from the component design: consumers, producers,
/// transports, room membership + `participantLeft`, room collapse, registry
/// removal.
pub struct CleanupCoordinator<'a> {
    rooms: &'a RoomRegistry,
    routers: &'a RouterRegistry,
    peers: &'a PeerRegistry,
}

impl<'a> CleanupCoordinator<'a> {
    pub fn new(rooms: &'a RoomRegistry, routers: &'a RouterRegistry, peers: &'a PeerRegistry) -> Self {
        Self {
            rooms,
            routers,
            peers,
        }
    }

    /// Idempotent: calling this twice for a peer no longer in the registry
    /// is a no-op the second time.
    pub async fn cleanup_peer(&self, peer_id: PeerId) {
        let Some(mut peer) = self.peers.get_mut(peer_id) else {
            debug!(%peer_id, "cleanup_peer called for a peer already removed");
            return;
        };

        let room_id = peer.room_id.clone();

        // 1. Close every consumer. mediasoup handles request closure on Drop,
        // so dropping the map's values is the close — engine-side failures
        // have no Rust-visible error to swallow.
        let consumer_count = peer.consumers.len() as i64;
        for (consumer_id, _consumer) in peer.consumers.drain() {
            debug!(%peer_id, %consumer_id, "consumer closed during cleanup");
        }
        if consumer_count > 0 {
            self.routers.notify_consumer_delta(&room_id, -consumer_count).await;
        }

        // 2. Unregister and close every producer.
        let producer_count = peer.producers.len() as i64;
        for (producer_id, _entry) in peer.producers.drain() {
            self.routers.unregister_producer(&room_id, &producer_id).await;
            debug!(%peer_id, %producer_id, "producer closed during cleanup");
        }
        if producer_count > 0 {
            self.routers.notify_producer_delta(&room_id, -producer_count).await;
        }

        // 3. Close every send and recv transport.
        for (transport_id, _transport) in peer.send_transports.drain() {
            debug!(%peer_id, %transport_id, "send transport closed during cleanup");
            self.routers.notify_transport_closed(&room_id).await;
        }
        for (transport_id, _transport) in peer.recv_transports.drain() {
            debug!(%peer_id, %transport_id, "recv transport closed during cleanup");
            self.routers.notify_transport_closed(&room_id).await;
        }
        peer.recv_transport_order.clear();

        drop(peer); // release the PeerRegistry entry lock before touching other registries

        // 4. Remove from room membership; notify the remainder of the room.
        let room_emptied = self.rooms.leave(&room_id, peer_id);
        let user_id = self
            .peers
            .get(peer_id)
            .map(|p| p.user_id.clone())
            .unwrap_or_default();

        let fanout = EventFanout::new(self.rooms, self.peers);
        fanout
            .to_room_except_sender(
                &room_id,
                peer_id,
                ServerEvent::ParticipantLeft {
                    peer_id,
                    user_id: user_id.clone(),
                },
            )
            .await;
        self.routers.set_peer_count(&room_id, self.rooms.peer_count(&room_id)).await;

        // 5. Collapse the room if it's now empty.
        if room_emptied {
            self.routers.cleanup(&room_id).await;
            self.rooms.drop_room(&room_id);
        }

        // 6. Remove the peer from the registry.
        self.peers.remove(peer_id);
    }
}
