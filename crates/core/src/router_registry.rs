use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use mediasoup::router::{Router, RouterOptions};
use mediasoup::rtp_parameters::MediaKind;
use mediasoup::worker::WorkerId;
use tokio::sync::Mutex;
use tracing::info;

use crate::codecs::media_codecs;
use crate::error::CoreError;
use crate::ids::{PeerId, RoomId};
use crate::worker_pool::{LoadCounter, WorkerPool};

#[derive(Debug, Clone)]
pub struct ProducerIndexEntry {
    pub producer_id: String,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub user_name: String,
}

#[derive(Debug, Clone)]
pub struct RoomStats {
    pub peer_count: usize,
    pub producer_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub uptime_secs: u64,
}

struct RouterEntry {
    router: Router,
    worker_id: WorkerId,
    producer_index: Vec<ProducerIndexEntry>,
    created_at: chrono::DateTime<chrono::Utc>,
    created_at_instant: Instant,
    peer_count: usize,
}

/// Maps room id → router + owning worker + live producer index. One router
/// per room, created lazily on first join, closed when the room empties.
pub struct RouterRegistry {
    worker_pool: Arc<WorkerPool>,
    rooms: Mutex<HashMap<RoomId, RouterEntry>>,
}

impl RouterRegistry {
    pub fn new(worker_pool: Arc<WorkerPool>) -> Self {
        Self {
            worker_pool,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent: concurrent calls for the same room id observe the same
    /// router, because the whole create-or-fetch happens under the map's lock.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Result<Router, CoreError> {
        let mut rooms = self.rooms.lock().await;
        if let Some(entry) = rooms.get(room_id) {
            return Ok(entry.router.clone());
        }

        let worker = self.worker_pool.least_loaded().await?;
        let worker_id = worker.id();
        let router = worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| CoreError::EngineError(e.to_string()))?;

        self.worker_pool
            .update_load(worker_id, LoadCounter::Routers, 1)
            .await;

        info!(%room_id, %worker_id, "router created for room");

        rooms.insert(
            room_id.clone(),
            RouterEntry {
                router: router.clone(),
                worker_id,
                producer_index: Vec::new(),
                created_at: chrono::Utc::now(),
                created_at_instant: Instant::now(),
                peer_count: 0,
            },
        );

        Ok(router)
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<Router> {
        self.rooms.lock().await.get(room_id).map(|e| e.router.clone())
    }

    /// Closes the router (cascading in the media engine via Drop — mediasoup
    /// handles request closure when their last clone goes out of scope),
    /// clears the producer index, and removes the room entry.
    pub async fn cleanup(&self, room_id: &RoomId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(entry) = rooms.remove(room_id) {
            let worker_id = entry.worker_id;
            drop(entry);
            self.worker_pool
                .update_load(worker_id, LoadCounter::Routers, -1)
                .await;
            info!(%room_id, "router closed, room removed from registry");
        }
    }

    pub async fn register_producer(&self, room_id: &RoomId, entry: ProducerIndexEntry) {
        if let Some(room) = self.rooms.lock().await.get_mut(room_id) {
            room.producer_index.push(entry);
        }
    }

    pub async fn unregister_producer(&self, room_id: &RoomId, producer_id: &str) {
        if let Some(room) = self.rooms.lock().await.get_mut(room_id) {
            room.producer_index.retain(|e| e.producer_id != producer_id);
        }
    }

    /// All producer entries in the room other than `exclude_peer_id`'s own.
    pub async fn others_of(&self, room_id: &RoomId, exclude_peer_id: PeerId) -> Vec<ProducerIndexEntry> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map(|room| {
                room.producer_index
                    .iter()
                    .filter(|e| e.peer_id != exclude_peer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn set_peer_count(&self, room_id: &RoomId, count: usize) {
        if let Some(room) = self.rooms.lock().await.get_mut(room_id) {
            room.peer_count = count;
        }
    }

    pub async fn stats(&self, room_id: &RoomId) -> Option<RoomStats> {
        self.rooms.lock().await.get(room_id).map(|room| RoomStats {
            peer_count: room.peer_count,
            producer_count: room.producer_index.len(),
            created_at: room.created_at,
            uptime_secs: room.created_at_instant.elapsed().as_secs(),
        })
    }

    pub async fn is_full(&self, room_id: &RoomId, max_peers: usize) -> bool {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map(|room| room.peer_count >= max_peers)
            .unwrap_or(false)
    }

    /// Called on every new transport created against a room's router, so the
    /// worker pool's transport counter tracks reality. The close side is
    /// driven by the transport's own `on_transport_close` observer, wired by
    /// the caller at transport-creation time.
    pub async fn notify_transport_created(&self, room_id: &RoomId) {
        if let Some(worker_id) = self.worker_id_of(room_id).await {
            self.worker_pool
                .update_load(worker_id, LoadCounter::Transports, 1)
                .await;
        }
    }

    pub async fn notify_transport_closed(&self, room_id: &RoomId) {
        if let Some(worker_id) = self.worker_id_of(room_id).await {
            self.worker_pool
                .update_load(worker_id, LoadCounter::Transports, -1)
                .await;
        }
    }

    pub async fn notify_consumer_delta(&self, room_id: &RoomId, delta: i64) {
        if let Some(worker_id) = self.worker_id_of(room_id).await {
            self.worker_pool
                .update_load(worker_id, LoadCounter::Consumers, delta)
                .await;
        }
    }

    pub async fn notify_producer_delta(&self, room_id: &RoomId, delta: i64) {
        if let Some(worker_id) = self.worker_id_of(room_id).await {
            self.worker_pool
                .update_load(worker_id, LoadCounter::Producers, delta)
                .await;
        }
    }

    async fn worker_id_of(&self, room_id: &RoomId) -> Option<WorkerId> {
        self.rooms.lock().await.get(room_id).map(|e| e.worker_id)
    }
}
