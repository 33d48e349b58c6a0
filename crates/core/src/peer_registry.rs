use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use mediasoup::consumer::Consumer;
use mediasoup::producer::Producer;
use mediasoup::webrtc_transport::WebRtcTransport;

use crate::ids::{PeerId, RoomId, UserId};
use crate::protocol::ServerEvent;

/// Decouples the orchestration core from the WebSocket transport: a peer's
/// outbound channel is whatever the API layer wired up at connect time.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    async fn send(&self, event: ServerEvent);
}

#[derive(Debug, Clone, Default)]
pub struct PeerFlags {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub hand_raised: bool,
    pub is_owner: bool,
}

pub struct ProducerEntry {
    pub producer: Producer,
    pub user_name: String,
    pub kind: mediasoup::prelude::MediaKind,
    /// Caller-supplied `appData` merged with `{peerId}`, kept alongside the
    /// engine handle — mediasoup's own `AppData` is an opaque `Any` bag not
    /// worth routing arbitrary client JSON through.
    pub app_data: serde_json::Value,
}

/// One connected client's full server-side state.
pub struct PeerState {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub display_name: String,
    pub room_id: RoomId,
    pub channel: Arc<dyn PeerChannel>,
    pub send_transports: HashMap<String, WebRtcTransport>,
    pub recv_transports: HashMap<String, WebRtcTransport>,
    /// Insertion order of `recv_transports`, for the "last-created-wins"
    /// resolution of `consume` when a peer has more than one recv transport.
    pub recv_transport_order: Vec<String>,
    pub producers: HashMap<String, ProducerEntry>,
    pub consumers: HashMap<String, Consumer>,
    pub flags: PeerFlags,
    pub joined_at: DateTime<Utc>,
}

impl PeerState {
    pub fn new(
        peer_id: PeerId,
        user_id: UserId,
        display_name: String,
        room_id: RoomId,
        channel: Arc<dyn PeerChannel>,
        is_owner: bool,
    ) -> Self {
        Self {
            peer_id,
            user_id,
            display_name,
            room_id,
            channel,
            send_transports: HashMap::new(),
            recv_transports: HashMap::new(),
            recv_transport_order: Vec::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            flags: PeerFlags {
                is_owner,
                ..Default::default()
            },
            joined_at: Utc::now(),
        }
    }

    pub fn insert_recv_transport(&mut self, id: String, transport: WebRtcTransport) {
        self.recv_transports.insert(id.clone(), transport);
        self.recv_transport_order.push(id);
    }

    pub fn remove_recv_transport(&mut self, id: &str) {
        self.recv_transports.remove(id);
        self.recv_transport_order.retain(|t| t != id);
    }

    /// The most recently created recv transport — last-created-wins, per the
    /// resolved open question on which recv transport `consume` should use.
    pub fn last_recv_transport(&self) -> Option<&WebRtcTransport> {
        self.recv_transport_order
            .last()
            .and_then(|id| self.recv_transports.get(id))
    }

    pub fn find_transport(&self, transport_id: &str) -> Option<&WebRtcTransport> {
        self.send_transports
            .get(transport_id)
            .or_else(|| self.recv_transports.get(transport_id))
    }
}

/// One `PeerState` per connected client, keyed by peer id.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerState>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn insert(&self, peer: PeerState) {
        self.peers.insert(peer.peer_id, peer);
    }

    pub fn get(&self, peer_id: PeerId) -> Option<Ref<'_, PeerId, PeerState>> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&self, peer_id: PeerId) -> Option<RefMut<'_, PeerId, PeerState>> {
        self.peers.get_mut(&peer_id)
    }

    pub fn remove(&self, peer_id: PeerId) -> Option<PeerState> {
        self.peers.remove(&peer_id).map(|(_, state)| state)
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers.contains_key(&peer_id)
    }
}
