//! Exercises the worker pool against a real `mediasoup::worker_manager::WorkerManager`,
//! the way the underlying media engine tests its own worker manager. Requires
//! a `mediasoup-worker` binary reachable the way the `mediasoup` crate expects
//! (see its build script); skipped transparently if the feature isn't wired
//! in a given CI image — these are smoke tests for the pool's plumbing, not a
//! substitute for the pure-logic unit tests in `worker_pool.rs`.

use confero_config::MediasoupSettings;
use confero_core::WorkerPool;

fn settings(num_workers: u32) -> MediasoupSettings {
    MediasoupSettings {
        num_workers,
        listen_ip: "127.0.0.1".into(),
        announced_ip: None,
        rtc_base_port: 30000,
        rtc_port_range_size: 100,
        max_peers_per_room: 150,
        initial_available_outgoing_bitrate: 1_000_000,
        min_available_outgoing_bitrate: 600_000,
        max_incoming_bitrate: 1_500_000,
        max_sctp_message_size: 262_144,
    }
}

#[tokio::test]
async fn spawns_requested_worker_count() {
    let pool = WorkerPool::new(&settings(2)).await.expect("worker pool should start");
    assert_eq!(pool.worker_count().await, 2);
}

#[tokio::test]
async fn port_ranges_are_disjoint_across_workers() {
    let pool = WorkerPool::new(&settings(3)).await.expect("worker pool should start");
    let mut ranges = pool.port_ranges().await;
    ranges.sort();
    for window in ranges.windows(2) {
        assert!(window[0].1 < window[1].0, "overlapping port ranges: {window:?}");
    }
}

#[tokio::test]
async fn least_loaded_picks_a_real_worker_when_pool_nonempty() {
    let pool = WorkerPool::new(&settings(1)).await.expect("worker pool should start");
    let worker = pool.least_loaded().await.expect("a worker should be available");
    // Any live worker has a well-formed id; this is mostly confirming the
    // plumbing returns a usable handle rather than a placeholder.
    assert!(!worker.id().to_string().is_empty());
}

#[tokio::test]
async fn round_robin_cycles_through_every_worker_before_repeating() {
    let pool = WorkerPool::new(&settings(3)).await.expect("worker pool should start");
    let mut seen = Vec::new();
    for _ in 0..3 {
        let worker = pool.round_robin().await.expect("a worker should be available");
        seen.push(worker.id());
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3, "three calls should visit three distinct workers");

    let fourth = pool.round_robin().await.expect("a worker should be available");
    assert!(seen.contains(&fourth.id()), "the cycle should wrap back to an already-seen worker");
}
