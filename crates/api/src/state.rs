use std::sync::Arc;

use confero_config::Settings;
use confero_core::{JoinTokenVerifier, PeerRegistry, RoomRegistry, RouterRegistry, SignalingDispatcher, WorkerPool};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub dispatcher: Arc<SignalingDispatcher>,
}

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let worker_pool = WorkerPool::new(&settings.mediasoup).await?;
        let routers = Arc::new(RouterRegistry::new(Arc::clone(&worker_pool)));
        let rooms = Arc::new(RoomRegistry::new());
        let peers = Arc::new(PeerRegistry::new());
        let auth = Arc::new(JoinTokenVerifier::new(settings.jwt.clone()));

        let dispatcher = Arc::new(SignalingDispatcher {
            worker_pool,
            routers,
            rooms,
            peers,
            auth,
            mediasoup_settings: settings.mediasoup.clone(),
        });

        Ok(Self { settings, dispatcher })
    }
}
