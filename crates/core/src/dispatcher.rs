use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use confero_config::MediasoupSettings;
use mediasoup::consumer::ConsumerLayers;
use mediasoup::data_structures::{DtlsParameters, DtlsState, IceState, ListenInfo, Protocol};
use mediasoup::prelude::{ConsumerOptions, ProducerOptions, WebRtcTransportListenInfos, WebRtcTransportOptions};
use mediasoup::producer::ProducerId;
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::transport::Transport;
use mediasoup::webrtc_transport::{WebRtcTransport, WebRtcTransportRemoteParameters};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::ack::Ack;
use crate::auth::JoinTokenVerifier;
use crate::cleanup::CleanupCoordinator;
use crate::error::CoreError;
use crate::event_fanout::{self, EventFanout};
use crate::ids::{PeerId, RoomId};
use crate::peer_registry::{PeerChannel, PeerRegistry, PeerState, ProducerEntry};
use crate::protocol::{ClientSignal, ParticipantView, ServerEvent, TransportDirection};
use crate::room_registry::RoomRegistry;
use crate::router_registry::{ProducerIndexEntry, RouterRegistry};
use crate::worker_pool::WorkerPool;

pub struct SignalingDispatcher {
    pub worker_pool: Arc<WorkerPool>,
    pub routers: Arc<RouterRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub peers: Arc<PeerRegistry>,
    pub auth: Arc<JoinTokenVerifier>,
    pub mediasoup_settings: MediasoupSettings,
}

fn participant_view(peer: &PeerState) -> ParticipantView {
    ParticipantView {
        socket_id: peer.peer_id.to_string(),
        peer_id: peer.peer_id.to_string(),
        user_id: peer.user_id.clone(),
        user_name: peer.display_name.clone(),
        audio_enabled: peer.flags.audio_enabled,
        video_enabled: peer.flags.video_enabled,
        screen_sharing: peer.flags.screen_sharing,
        hand_raised: peer.flags.hand_raised,
        joined_at: peer.joined_at,
        is_owner: peer.flags.is_owner,
    }
}

fn producer_index_entry_json(entry: &ProducerIndexEntry) -> Value {
    json!({
        "producerId": entry.producer_id,
        "peerId": entry.peer_id,
        "kind": entry.kind,
        "userName": entry.user_name,
    })
}

/// Drops a transport's handle from whichever of the peer's maps holds it and,
/// only if it was actually still there, decrements the worker's transport
/// load counter. The "only if" makes this safe to call from more than one
/// observer hook for the same transport (e.g. a DTLS failure and the
/// transport's own close both firing) without double-counting.
async fn drop_transport(routers: &RouterRegistry, peers: &PeerRegistry, peer_id: PeerId, room_id: &RoomId, transport_id: &str) {
    let removed = match peers.get_mut(peer_id) {
        Some(mut peer) => {
            let had_send = peer.send_transports.remove(transport_id).is_some();
            let had_recv = peer.recv_transports.contains_key(transport_id);
            if had_recv {
                peer.remove_recv_transport(transport_id);
            }
            had_send || had_recv
        }
        None => false,
    };
    if removed {
        routers.notify_transport_closed(room_id).await;
    }
}

impl SignalingDispatcher {
    fn fanout(&self) -> EventFanout<'_> {
        EventFanout::new(&self.rooms, &self.peers)
    }

    fn cleanup(&self) -> CleanupCoordinator<'_> {
        CleanupCoordinator::new(&self.rooms, &self.routers, &self.peers)
    }

    fn listen_infos(&self) -> WebRtcTransportListenInfos {
        let listen_ip: IpAddr = self
            .mediasoup_settings
            .listen_ip
            .parse()
            .unwrap_or_else(|_| "0.0.0.0".parse().unwrap());
        let announced_address = self.mediasoup_settings.announced_ip.clone();

        let udp = ListenInfo {
            protocol: Protocol::Udp,
            ip: listen_ip,
            announced_address: announced_address.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };
        let tcp = ListenInfo {
            protocol: Protocol::Tcp,
            ip: listen_ip,
            announced_address,
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };
        WebRtcTransportListenInfos::new(udp).insert(tcp)
    }

    /// Entry point for every inbound message except the WebSocket closing
    /// (routed straight to `handle_disconnect`). `channel` is only consulted
    /// by `joinRoom`, the one message a peer can send before it exists in
    /// the registry.
    pub async fn handle(&self, peer_id: PeerId, channel: Arc<dyn PeerChannel>, signal: ClientSignal, ack: Ack) {
        if let ClientSignal::JoinRoom {
            token,
            room_id,
            user_name,
        } = signal
        {
            self.handle_join(peer_id, channel, token, room_id, user_name, ack).await;
            return;
        }

        if !self.peers.contains(peer_id) {
            ack.err(CoreError::PeerNotFound);
            return;
        }

        match signal {
            ClientSignal::JoinRoom { .. } => unreachable!("handled above"),
            ClientSignal::CreateTransport { room_id, direction } => {
                self.handle_create_transport(peer_id, room_id, direction, ack).await
            }
            ClientSignal::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => self.handle_connect_transport(peer_id, transport_id, dtls_parameters, ack).await,
            ClientSignal::Produce {
                transport_id,
                kind,
                rtp_parameters,
                app_data,
            } => self.handle_produce(peer_id, transport_id, kind, rtp_parameters, app_data, ack).await,
            ClientSignal::Consume {
                producer_id,
                rtp_capabilities,
            } => self.handle_consume(peer_id, producer_id, rtp_capabilities, ack).await,
            ClientSignal::ResumeConsumer { consumer_id } => {
                self.handle_resume_consumer(peer_id, consumer_id, ack).await
            }
            ClientSignal::PauseConsumer { consumer_id } => {
                self.handle_pause_consumer(peer_id, consumer_id, ack).await
            }
            ClientSignal::PauseProducer { producer_id } => {
                self.handle_pause_producer(peer_id, producer_id, ack).await
            }
            ClientSignal::ResumeProducer { producer_id } => {
                self.handle_resume_producer(peer_id, producer_id, ack).await
            }
            ClientSignal::CloseProducer { producer_id } => {
                self.handle_close_producer(peer_id, producer_id, ack).await
            }
            ClientSignal::ToggleHandRaise => self.handle_toggle_hand_raise(peer_id, ack).await,
            ClientSignal::ChatMessage { message } => self.handle_chat_message(peer_id, message, ack).await,
            ClientSignal::GetExistingProducers => self.handle_get_existing_producers(peer_id, ack).await,
            ClientSignal::GetRoomStats { room_id } => self.handle_get_room_stats(room_id, ack).await,
            ClientSignal::SetConsumerPreferredLayers {
                consumer_id,
                spatial_layer,
                temporal_layer,
            } => {
                self.handle_set_preferred_layers(peer_id, consumer_id, spatial_layer, temporal_layer, ack)
                    .await
            }
            ClientSignal::EndMeeting { room_id } => self.handle_end_meeting(peer_id, room_id, ack).await,
            ClientSignal::LeaveRoom => self.handle_leave_room(peer_id, ack).await,
        }
    }

    pub async fn handle_disconnect(&self, peer_id: PeerId) {
        self.cleanup().cleanup_peer(peer_id).await;
    }

    async fn handle_join(
        &self,
        peer_id: PeerId,
        channel: Arc<dyn PeerChannel>,
        token: String,
        room_id: RoomId,
        user_name: Option<String>,
        ack: Ack,
    ) {
        let user_id = match self.auth.verify(&token) {
            Ok(uid) => uid,
            Err(_) => {
                ack.err(CoreError::Unauthenticated);
                return;
            }
        };

        if self
            .routers
            .is_full(&room_id, self.mediasoup_settings.max_peers_per_room as usize)
            .await
        {
            ack.err(CoreError::RoomFull);
            return;
        }

        let router = match self.routers.get_or_create(&room_id).await {
            Ok(r) => r,
            Err(e) => {
                ack.err(e);
                return;
            }
        };

        let display_name = user_name.unwrap_or_else(|| user_id.clone());
        let (is_owner, existing_peer_ids) = self.rooms.join(&room_id, peer_id);

        let participants: Vec<ParticipantView> = existing_peer_ids
            .into_iter()
            .filter_map(|pid| self.peers.get(pid).map(|p| participant_view(&p)))
            .collect();

        let peer = PeerState::new(peer_id, user_id.clone(), display_name, room_id.clone(), channel, is_owner);
        self.peers.insert(peer);
        self.routers.set_peer_count(&room_id, self.rooms.peer_count(&room_id)).await;

        let existing_producers: Vec<ProducerIndexEntry> = self.routers.others_of(&room_id, peer_id).await;

        let joined_view = self.peers.get(peer_id).map(|p| participant_view(&p)).expect("peer just inserted");
        self.fanout()
            .to_room_except_sender(
                &room_id,
                peer_id,
                ServerEvent::ParticipantJoined {
                    participant: joined_view,
                },
            )
            .await;

        info!(%room_id, %peer_id, %user_id, is_owner, "peer joined room");

        ack.ok(json!({
            "routerRtpCapabilities": router.rtp_capabilities(),
            "participants": participants,
            "existingProducers": existing_producers.iter().map(producer_index_entry_json).collect::<Vec<_>>(),
            "peerId": peer_id,
            "isOwner": is_owner,
        }));
    }

    async fn handle_create_transport(&self, peer_id: PeerId, room_id: RoomId, direction: TransportDirection, ack: Ack) {
        let Some(router) = self.routers.get(&room_id).await else {
            ack.err(CoreError::RouterNotFound);
            return;
        };

        let mut options = WebRtcTransportOptions::new(self.listen_infos());
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;
        options.enable_sctp = false;
        options.initial_available_outgoing_bitrate = self.mediasoup_settings.initial_available_outgoing_bitrate;

        let transport = match router.create_webrtc_transport(options).await {
            Ok(t) => t,
            Err(e) => {
                ack.err(CoreError::EngineError(e.to_string()));
                return;
            }
        };

        if direction == TransportDirection::Recv {
            if let Err(e) = transport
                .set_max_incoming_bitrate(self.mediasoup_settings.max_incoming_bitrate)
                .await
            {
                warn!(%peer_id, error = %e, "set_max_incoming_bitrate failed, continuing");
            }
        }

        self.routers.notify_transport_created(&room_id).await;

        // Re-validate: the peer may have disconnected during the awaits above.
        let Some(mut peer) = self.peers.get_mut(peer_id) else {
            ack.err(CoreError::PeerNotFound);
            return;
        };

        let id = transport.id().to_string();
        let ice_parameters = serde_json::to_value(transport.ice_parameters()).unwrap_or_default();
        let ice_candidates = serde_json::to_value(transport.ice_candidates()).unwrap_or_default();
        let dtls_parameters = serde_json::to_value(transport.dtls_parameters()).unwrap_or_default();

        self.install_transport_hooks(peer_id, room_id.clone(), id.clone(), &transport);

        match direction {
            TransportDirection::Send => {
                peer.send_transports.insert(id.clone(), transport);
            }
            TransportDirection::Recv => {
                peer.insert_recv_transport(id.clone(), transport);
            }
        }

        ack.ok(json!({
            "id": id,
            "iceParameters": ice_parameters,
            "iceCandidates": ice_candidates,
            "dtlsParameters": dtls_parameters,
            "sctpParameters": Value::Null,
        }));
    }

    /// Wires the transport's own lifecycle observers: close drops the handle
    /// from whichever of the peer's maps holds it and decrements the load
    /// counter; a fatal DTLS state does the same proactively, since a failed
    /// handshake doesn't reliably trigger the engine's own close; ICE
    /// disconnect/close is logged only — ICE can reconnect, DTLS can't.
    fn install_transport_hooks(&self, peer_id: PeerId, room_id: RoomId, transport_id: String, transport: &WebRtcTransport) {
        let routers = Arc::clone(&self.routers);
        let peers = Arc::clone(&self.peers);
        let room_id_for_close = room_id.clone();
        let transport_id_for_close = transport_id.clone();
        transport
            .on_close(move || {
                let routers = Arc::clone(&routers);
                let peers = Arc::clone(&peers);
                let room_id = room_id_for_close.clone();
                let transport_id = transport_id_for_close.clone();
                tokio::spawn(async move {
                    drop_transport(&routers, &peers, peer_id, &room_id, &transport_id).await;
                });
            })
            .detach();

        let transport_id_for_ice = transport_id.clone();
        transport
            .on_ice_state_change(move |state| {
                if matches!(state, IceState::Disconnected | IceState::Closed) {
                    warn!(%peer_id, transport_id = %transport_id_for_ice, ?state, "transport ICE state change");
                }
            })
            .detach();

        let routers = Arc::clone(&self.routers);
        let peers = Arc::clone(&self.peers);
        let room_id_for_dtls = room_id;
        let transport_id_for_dtls = transport_id;
        transport
            .on_dtls_state_change(move |state| {
                if matches!(state, DtlsState::Failed | DtlsState::Closed) {
                    warn!(%peer_id, transport_id = %transport_id_for_dtls, ?state, "transport DTLS state change, closing");
                    let routers = Arc::clone(&routers);
                    let peers = Arc::clone(&peers);
                    let room_id = room_id_for_dtls.clone();
                    let transport_id = transport_id_for_dtls.clone();
                    tokio::spawn(async move {
                        drop_transport(&routers, &peers, peer_id, &room_id, &transport_id).await;
                    });
                }
            })
            .detach();
    }

    async fn handle_connect_transport(&self, peer_id: PeerId, transport_id: String, dtls_parameters: DtlsParameters, ack: Ack) {
        let transport = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.find_transport(&transport_id).cloned()
        };

        let Some(transport) = transport else {
            ack.err(CoreError::TransportNotFound);
            return;
        };

        match transport.connect(WebRtcTransportRemoteParameters { dtls_parameters }).await {
            Ok(()) => ack.ok(json!({"connected": true})),
            Err(e) => ack.err(CoreError::EngineError(e.to_string())),
        }
    }

    async fn handle_produce(
        &self,
        peer_id: PeerId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
        ack: Ack,
    ) {
        let (room_id, transport, user_name) = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            let Some(transport) = peer.send_transports.get(&transport_id).cloned() else {
                ack.err(CoreError::TransportNotFound);
                return;
            };
            (peer.room_id.clone(), transport, peer.display_name.clone())
        };

        let producer = match transport.produce(ProducerOptions::new(kind, rtp_parameters)).await {
            Ok(p) => p,
            Err(e) => {
                ack.err(CoreError::EngineError(e.to_string()));
                return;
            }
        };

        self.routers.notify_producer_delta(&room_id, 1).await;

        let producer_id = producer.id();
        let producer_id_str = producer_id.to_string();
        let is_screen = app_data.get("source").and_then(Value::as_str) == Some("screen");
        let mut merged_app_data = app_data;
        if let Value::Object(ref mut map) = merged_app_data {
            map.insert("peerId".into(), json!(peer_id));
        }

        {
            let Some(mut peer) = self.peers.get_mut(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            match kind {
                MediaKind::Audio => peer.flags.audio_enabled = true,
                MediaKind::Video if is_screen => peer.flags.screen_sharing = true,
                MediaKind::Video => peer.flags.video_enabled = true,
            }
            peer.producers.insert(
                producer_id_str.clone(),
                ProducerEntry {
                    producer: producer.clone(),
                    user_name: user_name.clone(),
                    kind,
                    app_data: merged_app_data,
                },
            );
        }

        self.routers
            .register_producer(
                &room_id,
                ProducerIndexEntry {
                    producer_id: producer_id_str.clone(),
                    peer_id,
                    kind,
                    user_name: user_name.clone(),
                },
            )
            .await;

        self.install_producer_hooks(peer_id, room_id.clone(), producer_id_str.clone(), &producer);

        self.fanout()
            .to_room_except_sender(
                &room_id,
                peer_id,
                ServerEvent::NewProducer {
                    producer_id: producer_id_str.clone(),
                    peer_id,
                    kind,
                    user_name,
                },
            )
            .await;

        ack.ok(json!({"id": producer_id_str}));
    }

    /// Wires the producer's close/pause/resume observers: close unregisters
    /// and notifies the room; pause/resume are not required by this handle
    /// (handled synchronously by `pauseProducer`/`resumeProducer`), but close
    /// also fires when the underlying transport dies, which those handlers
    /// never see.
    fn install_producer_hooks(&self, peer_id: PeerId, room_id: RoomId, producer_id: String, producer: &mediasoup::producer::Producer) {
        let routers = Arc::clone(&self.routers);
        let peers = Arc::clone(&self.peers);
        let rooms = Arc::clone(&self.rooms);
        let room_id_for_close = room_id.clone();
        let producer_id_for_close = producer_id.clone();
        producer
            .on_close(move || {
                let routers = Arc::clone(&routers);
                let peers = Arc::clone(&peers);
                let rooms = Arc::clone(&rooms);
                let room_id = room_id_for_close.clone();
                let producer_id = producer_id_for_close.clone();
                tokio::spawn(async move {
                    routers.unregister_producer(&room_id, &producer_id).await;
                    if let Some(mut peer) = peers.get_mut(peer_id) {
                        peer.producers.remove(&producer_id);
                    }
                    let fanout = EventFanout::new(&rooms, &peers);
                    fanout
                        .to_room_except_sender(
                            &room_id,
                            peer_id,
                            ServerEvent::ProducerClosed {
                                producer_id: producer_id.clone(),
                            },
                        )
                        .await;
                });
            })
            .detach();
    }

    async fn handle_consume(&self, peer_id: PeerId, producer_id: String, rtp_capabilities: RtpCapabilities, ack: Ack) {
        let (room_id, recv_transport) = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            let Some(transport) = peer.last_recv_transport().cloned() else {
                ack.err(CoreError::NoRecvTransport);
                return;
            };
            (peer.room_id.clone(), transport)
        };

        let Some(router) = self.routers.get(&room_id).await else {
            ack.err(CoreError::RouterNotFound);
            return;
        };

        let Ok(producer_id) = ProducerId::from_str(&producer_id) else {
            ack.err(CoreError::ProducerNotFound);
            return;
        };

        if !router.can_consume(&producer_id, &rtp_capabilities) {
            ack.err(CoreError::CodecMismatch);
            return;
        }

        let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = true;

        let consumer = match recv_transport.consume(options).await {
            Ok(c) => c,
            Err(e) => {
                ack.err(CoreError::EngineError(e.to_string()));
                return;
            }
        };

        self.routers.notify_consumer_delta(&room_id, 1).await;

        let consumer_id = consumer.id().to_string();
        let kind = consumer.kind();
        let rtp_parameters = serde_json::to_value(consumer.rtp_parameters()).unwrap_or_default();
        let producer_paused = consumer.producer_paused();

        self.install_consumer_hooks(peer_id, consumer_id.clone(), &consumer);

        {
            let Some(mut peer) = self.peers.get_mut(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.consumers.insert(consumer_id.clone(), consumer);
        }

        ack.ok(json!({
            "id": consumer_id,
            "producerId": producer_id,
            "kind": kind,
            "rtpParameters": rtp_parameters,
            "producerPaused": producer_paused,
        }));
    }

    fn install_consumer_hooks(&self, peer_id: PeerId, consumer_id: String, consumer: &mediasoup::consumer::Consumer) {
        let peers = Arc::clone(&self.peers);
        let cid = consumer_id.clone();
        consumer
            .on_producer_close(move || {
                let peers = Arc::clone(&peers);
                let cid = cid.clone();
                tokio::spawn(async move {
                    if let Some(mut peer) = peers.get_mut(peer_id) {
                        peer.consumers.remove(&cid);
                    }
                    event_fanout::send_to_peer(&peers, peer_id, ServerEvent::ConsumerClosed { consumer_id: cid }).await;
                });
            })
            .detach();

        let peers = Arc::clone(&self.peers);
        let cid = consumer_id.clone();
        consumer
            .on_producer_pause(move || {
                let peers = Arc::clone(&peers);
                let cid = cid.clone();
                tokio::spawn(async move {
                    event_fanout::send_to_peer(&peers, peer_id, ServerEvent::ConsumerPaused { consumer_id: cid }).await;
                });
            })
            .detach();

        let peers = Arc::clone(&self.peers);
        let cid = consumer_id;
        consumer
            .on_producer_resume(move || {
                let peers = Arc::clone(&peers);
                let cid = cid.clone();
                tokio::spawn(async move {
                    event_fanout::send_to_peer(&peers, peer_id, ServerEvent::ConsumerResumed { consumer_id: cid }).await;
                });
            })
            .detach();
    }

    async fn handle_resume_consumer(&self, peer_id: PeerId, consumer_id: String, ack: Ack) {
        let consumer = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.consumers.get(&consumer_id).cloned()
        };
        let Some(consumer) = consumer else {
            ack.err(CoreError::ConsumerNotFound);
            return;
        };
        match consumer.resume().await {
            Ok(()) => ack.ok(json!({"resumed": true})),
            Err(e) => ack.err(CoreError::EngineError(e.to_string())),
        }
    }

    async fn handle_pause_consumer(&self, peer_id: PeerId, consumer_id: String, ack: Ack) {
        let consumer = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.consumers.get(&consumer_id).cloned()
        };
        let Some(consumer) = consumer else {
            ack.err(CoreError::ConsumerNotFound);
            return;
        };
        match consumer.pause().await {
            Ok(()) => ack.ok(json!({"paused": true})),
            Err(e) => ack.err(CoreError::EngineError(e.to_string())),
        }
    }

    async fn handle_pause_producer(&self, peer_id: PeerId, producer_id: String, ack: Ack) {
        let (room_id, producer, kind, is_screen) = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            let Some(entry) = peer.producers.get(&producer_id) else {
                ack.err(CoreError::ProducerNotFound);
                return;
            };
            let is_screen = entry.app_data.get("source").and_then(Value::as_str) == Some("screen");
            (peer.room_id.clone(), entry.producer.clone(), entry.kind, is_screen)
        };

        if let Err(e) = producer.pause().await {
            ack.err(CoreError::EngineError(e.to_string()));
            return;
        }

        if let Some(mut peer) = self.peers.get_mut(peer_id) {
            match kind {
                MediaKind::Audio => peer.flags.audio_enabled = false,
                MediaKind::Video if is_screen => peer.flags.screen_sharing = false,
                MediaKind::Video => peer.flags.video_enabled = false,
            }
        }

        self.fanout()
            .to_room_except_sender(&room_id, peer_id, ServerEvent::ProducerPaused { producer_id })
            .await;
        ack.ok(json!({"paused": true}));
    }

    async fn handle_resume_producer(&self, peer_id: PeerId, producer_id: String, ack: Ack) {
        let (room_id, producer, kind, is_screen) = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            let Some(entry) = peer.producers.get(&producer_id) else {
                ack.err(CoreError::ProducerNotFound);
                return;
            };
            let is_screen = entry.app_data.get("source").and_then(Value::as_str) == Some("screen");
            (peer.room_id.clone(), entry.producer.clone(), entry.kind, is_screen)
        };

        if let Err(e) = producer.resume().await {
            ack.err(CoreError::EngineError(e.to_string()));
            return;
        }

        if let Some(mut peer) = self.peers.get_mut(peer_id) {
            match kind {
                MediaKind::Audio => peer.flags.audio_enabled = true,
                MediaKind::Video if is_screen => peer.flags.screen_sharing = true,
                MediaKind::Video => peer.flags.video_enabled = true,
            }
        }

        self.fanout()
            .to_room_except_sender(&room_id, peer_id, ServerEvent::ProducerResumed { producer_id })
            .await;
        ack.ok(json!({"resumed": true}));
    }

    async fn handle_close_producer(&self, peer_id: PeerId, producer_id: String, ack: Ack) {
        let (room_id, kind, is_screen) = {
            let Some(mut peer) = self.peers.get_mut(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            let Some(entry) = peer.producers.remove(&producer_id) else {
                ack.err(CoreError::ProducerNotFound);
                return;
            };
            let is_screen = entry.app_data.get("source").and_then(Value::as_str) == Some("screen");
            match entry.kind {
                MediaKind::Audio => peer.flags.audio_enabled = false,
                MediaKind::Video if is_screen => peer.flags.screen_sharing = false,
                MediaKind::Video => peer.flags.video_enabled = false,
            }
            // `entry.producer` drops here, which requests the engine-side
            // close; the producer's own `on_close` hook broadcasts
            // `producerClosed`, so this handler does not broadcast again.
            (peer.room_id.clone(), entry.kind, is_screen)
        };
        let _ = (kind, is_screen);

        self.routers.unregister_producer(&room_id, &producer_id).await;
        self.routers.notify_producer_delta(&room_id, -1).await;
        ack.ok(json!({"closed": true}));
    }

    async fn handle_toggle_hand_raise(&self, peer_id: PeerId, ack: Ack) {
        let (room_id, is_hand_raised) = {
            let Some(mut peer) = self.peers.get_mut(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.flags.hand_raised = !peer.flags.hand_raised;
            (peer.room_id.clone(), peer.flags.hand_raised)
        };

        self.fanout()
            .to_room_except_sender(&room_id, peer_id, ServerEvent::HandRaiseChanged { peer_id, is_hand_raised })
            .await;
        ack.ok(json!({"isHandRaised": is_hand_raised}));
    }

    async fn handle_chat_message(&self, peer_id: PeerId, message: String, ack: Ack) {
        let (room_id, user_name) = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            (peer.room_id.clone(), peer.display_name.clone())
        };

        let timestamp = chrono::Utc::now().timestamp_millis();
        self.fanout()
            .to_room_including_sender(
                &room_id,
                ServerEvent::NewChatMessage {
                    id: timestamp,
                    peer_id,
                    user_name,
                    message,
                    timestamp,
                },
            )
            .await;
        ack.ok(json!({"sent": true}));
    }

    async fn handle_get_existing_producers(&self, peer_id: PeerId, ack: Ack) {
        let Some(peer) = self.peers.get(peer_id) else {
            ack.err(CoreError::PeerNotFound);
            return;
        };
        let room_id = peer.room_id.clone();
        drop(peer);
        let producers = self.routers.others_of(&room_id, peer_id).await;
        ack.ok(json!({
            "producers": producers.iter().map(producer_index_entry_json).collect::<Vec<_>>(),
        }));
    }

    async fn handle_get_room_stats(&self, room_id: RoomId, ack: Ack) {
        let Some(stats) = self.routers.stats(&room_id).await else {
            ack.err(CoreError::RouterNotFound);
            return;
        };
        let participants: Vec<ParticipantView> = self
            .rooms
            .peers(&room_id)
            .into_iter()
            .filter_map(|pid| self.peers.get(pid).map(|p| participant_view(&p)))
            .collect();
        ack.ok(json!({
            "stats": {
                "peerCount": stats.peer_count,
                "producerCount": stats.producer_count,
                "createdAt": stats.created_at,
                "uptime": stats.uptime_secs,
            },
            "participants": participants,
        }));
    }

    async fn handle_set_preferred_layers(
        &self,
        peer_id: PeerId,
        consumer_id: String,
        spatial_layer: u8,
        temporal_layer: Option<u8>,
        ack: Ack,
    ) {
        let consumer = {
            let Some(peer) = self.peers.get(peer_id) else {
                ack.err(CoreError::PeerNotFound);
                return;
            };
            peer.consumers.get(&consumer_id).cloned()
        };
        let Some(consumer) = consumer else {
            ack.err(CoreError::ConsumerNotFound);
            return;
        };

        match consumer
            .set_preferred_layers(ConsumerLayers {
                spatial_layer,
                temporal_layer,
            })
            .await
        {
            Ok(()) => ack.ok(json!({"success": true})),
            Err(e) => ack.err(CoreError::EngineError(e.to_string())),
        }
    }

    async fn handle_end_meeting(&self, peer_id: PeerId, room_id: RoomId, ack: Ack) {
        if !self.rooms.is_owner(&room_id, peer_id) {
            ack.err(CoreError::NotOwner);
            return;
        }

        self.fanout()
            .to_room_except_sender(
                &room_id,
                peer_id,
                ServerEvent::MeetingEnded {
                    reason: "Host ended the meeting".to_string(),
                },
            )
            .await;

        let members = self.rooms.peers(&room_id);
        for member in members {
            self.cleanup().cleanup_peer(member).await;
        }
        self.cleanup().cleanup_peer(peer_id).await;

        ack.ok(json!({"ended": true}));
    }

    async fn handle_leave_room(&self, peer_id: PeerId, ack: Ack) {
        self.cleanup().cleanup_peer(peer_id).await;
        ack.ok(json!({"left": true}));
    }
}
