use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::Mutex;
use tracing::warn;

use confero_core::{PeerChannel, ServerEvent};

/// Adapts one peer's outbound half of an axum WebSocket to the orchestration
/// core's transport-agnostic `PeerChannel` trait.
pub struct WsPeerChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsPeerChannel {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Arc<Self> {
        Arc::new(Self { sink: Mutex::new(sink) })
    }

    pub async fn send_raw(&self, text: String) {
        if let Err(e) = self.sink.lock().await.send(Message::text(text)).await {
            warn!(%e, "failed to write to websocket, peer likely disconnected");
        }
    }
}

#[async_trait]
impl PeerChannel for WsPeerChannel {
    async fn send(&self, event: ServerEvent) {
        let text = serde_json::to_string(&event).unwrap_or_default();
        self.send_raw(text).await;
    }
}
