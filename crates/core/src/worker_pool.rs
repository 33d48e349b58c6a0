use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use confero_config::MediasoupSettings;
use mediasoup::worker::{Worker, WorkerId, WorkerLogLevel, WorkerLogTag, WorkerSettings};
use mediasoup::worker_manager::WorkerManager;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::CoreError;

/// Which load counter an observer hook is reporting a change to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadCounter {
    Routers,
    Transports,
    Consumers,
    Producers,
}

struct WorkerSlot {
    worker: Worker,
    port_range: RangeInclusive<u16>,
    routers: AtomicU64,
    transports: AtomicU64,
    consumers: AtomicU64,
    producers: AtomicU64,
}

/// `S(W) = 10·routers + transports + 0.5·consumers`. Routers dominate
/// steady-state cost, consumers are cheapest.
fn load_score(routers: u64, transports: u64, consumers: u64) -> f64 {
    10.0 * routers as f64 + transports as f64 + 0.5 * consumers as f64
}

impl WorkerSlot {
    fn score(&self) -> f64 {
        load_score(
            self.routers.load(Ordering::Relaxed),
            self.transports.load(Ordering::Relaxed),
            self.consumers.load(Ordering::Relaxed),
        )
    }

    fn counter(&self, counter: LoadCounter) -> &AtomicU64 {
        match counter {
            LoadCounter::Routers => &self.routers,
            LoadCounter::Transports => &self.transports,
            LoadCounter::Consumers => &self.consumers,
            LoadCounter::Producers => &self.producers,
        }
    }
}

/// A pool of mediasoup workers with load-aware placement and crash recovery.
pub struct WorkerPool {
    manager: WorkerManager,
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
    round_robin: AtomicUsize,
    base_port: u16,
    port_range_size: u16,
}

impl WorkerPool {
    pub async fn new(settings: &MediasoupSettings) -> anyhow::Result<Arc<Self>> {
        let pool = Arc::new(Self {
            manager: WorkerManager::new(),
            slots: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            base_port: settings.rtc_base_port,
            port_range_size: settings.rtc_port_range_size,
        });

        for index in 0..settings.num_workers {
            let port_range = pool.port_range_for(index);
            pool.spawn_worker(index, port_range).await?;
        }

        Ok(pool)
    }

    fn port_range_for(&self, index: u32) -> RangeInclusive<u16> {
        let start = self.base_port + (index as u16) * self.port_range_size;
        let end = start + self.port_range_size - 1;
        start..=end
    }

    async fn spawn_worker(
        self: &Arc<Self>,
        index: u32,
        port_range: RangeInclusive<u16>,
    ) -> anyhow::Result<()> {
        let mut worker_settings = WorkerSettings::default();
        worker_settings.rtc_port_range = port_range.clone();
        worker_settings.log_level = WorkerLogLevel::Warn;
        worker_settings.log_tags = vec![
            WorkerLogTag::Info,
            WorkerLogTag::Ice,
            WorkerLogTag::Dtls,
            WorkerLogTag::Rtp,
            WorkerLogTag::Srtp,
            WorkerLogTag::Rtcp,
        ];

        let worker = self
            .manager
            .create_worker(worker_settings)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create mediasoup worker {index}: {e}"))?;

        let worker_id = worker.id();
        let pool = Arc::clone(self);
        let restart_range = port_range.clone();
        worker
            .on_dead(move |reason| {
                error!(?reason, %worker_id, "mediasoup worker died, scheduling restart");
                let pool = Arc::clone(&pool);
                let range = restart_range.clone();
                tokio::spawn(async move {
                    pool.remove_dead(worker_id).await;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    if let Err(e) = pool.spawn_worker(index, range).await {
                        error!(error = %e, "failed to restart mediasoup worker");
                        if pool.slots.read().await.is_empty() {
                            error!("worker pool exhausted after failed restart, exiting");
                            std::process::exit(1);
                        }
                    }
                });
            })
            .detach();

        info!(%worker_id, start = %port_range.start(), end = %port_range.end(), "mediasoup worker created");

        let slot = Arc::new(WorkerSlot {
            worker,
            port_range,
            routers: AtomicU64::new(0),
            transports: AtomicU64::new(0),
            consumers: AtomicU64::new(0),
            producers: AtomicU64::new(0),
        });
        self.slots.write().await.push(slot);
        Ok(())
    }

    async fn remove_dead(&self, worker_id: WorkerId) {
        let mut slots = self.slots.write().await;
        slots.retain(|slot| slot.worker.id() != worker_id);
    }

    /// Returns the worker with the smallest load score, ties broken by
    /// first-encountered order. This is the default placement policy.
    pub async fn least_loaded(&self) -> Result<Worker, CoreError> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .min_by(|a, b| a.score().partial_cmp(&b.score()).unwrap())
            .map(|slot| slot.worker.clone())
            .ok_or(CoreError::NoWorkersAvailable)
    }

    /// Cyclic worker selection. Exists for test harness use; the dispatcher
    /// never calls this in normal operation.
    pub async fn round_robin(&self) -> Result<Worker, CoreError> {
        let slots = self.slots.read().await;
        if slots.is_empty() {
            return Err(CoreError::NoWorkersAvailable);
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % slots.len();
        Ok(slots[idx].worker.clone())
    }

    /// Thread-safe increment/decrement of a worker's load counter, driven by
    /// the Router Registry's observer hooks on router/transport create/close.
    pub async fn update_load(&self, worker_id: WorkerId, counter: LoadCounter, delta: i64) {
        let slots = self.slots.read().await;
        let Some(slot) = slots.iter().find(|s| s.worker.id() == worker_id) else {
            warn!(%worker_id, "update_load for unknown worker, likely post-crash");
            return;
        };
        if delta >= 0 {
            slot.counter(counter).fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            slot.counter(counter)
                .fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Returns the `(start, end)` port range of every live worker, for testing
    /// the disjoint-ranges invariant.
    pub async fn port_ranges(&self) -> Vec<(u16, u16)> {
        self.slots
            .read()
            .await
            .iter()
            .map(|s| (*s.port_range.start(), *s.port_range.end()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(num_workers: u32) -> MediasoupSettings {
        MediasoupSettings {
            num_workers,
            listen_ip: "0.0.0.0".into(),
            announced_ip: None,
            rtc_base_port: 20000,
            rtc_port_range_size: 1000,
            max_peers_per_room: 150,
            initial_available_outgoing_bitrate: 1_000_000,
            min_available_outgoing_bitrate: 600_000,
            max_incoming_bitrate: 1_500_000,
            max_sctp_message_size: 262_144,
        }
    }

    #[test]
    fn port_range_formula_is_disjoint_and_covers_expected_span() {
        let s = settings(3);
        // Pure arithmetic check, no worker process spawned.
        let ranges: Vec<(u16, u16)> = (0..s.num_workers as u16)
            .map(|i| {
                let start = s.rtc_base_port + i * s.rtc_port_range_size;
                (start, start + s.rtc_port_range_size - 1)
            })
            .collect();

        assert_eq!(ranges, vec![(20000, 20999), (21000, 21999), (22000, 22999)]);
        for window in ranges.windows(2) {
            assert!(window[0].1 < window[1].0);
        }
    }

    #[test]
    fn score_weighs_routers_heaviest() {
        // 1 router (score 10) outweighs 19 consumers (score 9.5).
        assert!(load_score(1, 0, 0) > load_score(0, 0, 19));
    }

    #[test]
    fn score_zero_for_idle_worker() {
        assert_eq!(load_score(0, 0, 0), 0.0);
    }
}
