//! Exercises the Router Registry's producer index and the Cleanup
//! Coordinator's cascade against a real mediasoup worker/router, the way
//! `worker_pool_engine.rs` exercises the pool itself.

use std::sync::Arc;

use async_trait::async_trait;
use confero_config::MediasoupSettings;
use confero_core::cleanup::CleanupCoordinator;
use confero_core::peer_registry::{PeerChannel, PeerState};
use confero_core::router_registry::ProducerIndexEntry;
use confero_core::{PeerId, PeerRegistry, RoomRegistry, RouterRegistry, ServerEvent, WorkerPool};
use mediasoup::rtp_parameters::MediaKind;

fn settings(base_port: u16) -> MediasoupSettings {
    MediasoupSettings {
        num_workers: 1,
        listen_ip: "127.0.0.1".into(),
        announced_ip: None,
        rtc_base_port: base_port,
        rtc_port_range_size: 100,
        max_peers_per_room: 150,
        initial_available_outgoing_bitrate: 1_000_000,
        min_available_outgoing_bitrate: 600_000,
        max_incoming_bitrate: 1_500_000,
        max_sctp_message_size: 262_144,
    }
}

struct NullChannel;

#[async_trait]
impl PeerChannel for NullChannel {
    async fn send(&self, _event: ServerEvent) {}
}

fn peer_state(peer_id: PeerId, room_id: &str) -> PeerState {
    PeerState::new(
        peer_id,
        "user".into(),
        "display-name".into(),
        room_id.to_string(),
        Arc::new(NullChannel),
        false,
    )
}

#[tokio::test]
async fn producer_index_stays_in_sync_with_register_and_unregister() {
    let pool = WorkerPool::new(&settings(32000)).await.expect("worker pool should start");
    let routers = RouterRegistry::new(pool);
    let room_id = "room-index".to_string();
    routers.get_or_create(&room_id).await.expect("router should be created");

    let alice = PeerId::new();
    let bob = PeerId::new();

    routers
        .register_producer(
            &room_id,
            ProducerIndexEntry {
                producer_id: "producer-alice".into(),
                peer_id: alice,
                kind: MediaKind::Audio,
                user_name: "alice".into(),
            },
        )
        .await;
    routers
        .register_producer(
            &room_id,
            ProducerIndexEntry {
                producer_id: "producer-bob".into(),
                peer_id: bob,
                kind: MediaKind::Video,
                user_name: "bob".into(),
            },
        )
        .await;

    let seen_by_alice = routers.others_of(&room_id, alice).await;
    assert_eq!(seen_by_alice.len(), 1);
    assert_eq!(seen_by_alice[0].producer_id, "producer-bob");

    routers.unregister_producer(&room_id, "producer-bob").await;
    assert!(routers.others_of(&room_id, alice).await.is_empty());

    let stats = routers.stats(&room_id).await.expect("room should still be registered");
    assert_eq!(stats.producer_count, 1, "alice's own producer is still indexed");
}

#[tokio::test]
async fn cleanup_peer_is_idempotent_and_collapses_the_room_once_empty() {
    let pool = WorkerPool::new(&settings(32100)).await.expect("worker pool should start");
    let routers = Arc::new(RouterRegistry::new(pool));
    let rooms = Arc::new(RoomRegistry::new());
    let peers = Arc::new(PeerRegistry::new());
    let room_id = "room-cleanup".to_string();

    routers.get_or_create(&room_id).await.expect("router should be created");

    let peer_id = PeerId::new();
    rooms.join(&room_id, peer_id);
    peers.insert(peer_state(peer_id, &room_id));

    let coordinator = CleanupCoordinator::new(&rooms, &routers, &peers);
    coordinator.cleanup_peer(peer_id).await;

    assert!(!peers.contains(peer_id));
    assert!(!rooms.contains_room(&room_id), "last peer leaving should collapse the room");
    assert!(routers.get(&room_id).await.is_none(), "the room's router should be torn down with it");

    // Second call for the same, now-absent peer must be a silent no-op.
    coordinator.cleanup_peer(peer_id).await;
    assert!(!peers.contains(peer_id));
}

#[tokio::test]
async fn cleanup_peer_leaves_room_alive_when_other_peers_remain() {
    let pool = WorkerPool::new(&settings(32200)).await.expect("worker pool should start");
    let routers = Arc::new(RouterRegistry::new(pool));
    let rooms = Arc::new(RoomRegistry::new());
    let peers = Arc::new(PeerRegistry::new());
    let room_id = "room-partial-cleanup".to_string();

    routers.get_or_create(&room_id).await.expect("router should be created");

    let alice = PeerId::new();
    let bob = PeerId::new();
    rooms.join(&room_id, alice);
    rooms.join(&room_id, bob);
    peers.insert(peer_state(alice, &room_id));
    peers.insert(peer_state(bob, &room_id));

    let coordinator = CleanupCoordinator::new(&rooms, &routers, &peers);
    coordinator.cleanup_peer(alice).await;

    assert!(!peers.contains(alice));
    assert!(peers.contains(bob));
    assert!(rooms.contains_room(&room_id), "room survives while bob is still in it");
    assert!(routers.get(&room_id).await.is_some());
}
