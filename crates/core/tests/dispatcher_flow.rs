//! End-to-end signaling flow against a real mediasoup worker: join, create
//! transports, connect, produce, and consume — mirroring the join -> produce
//! -> consume round trip a real call sets up before any media flows.

use std::num::{NonZeroU32, NonZeroU8};
use std::sync::Arc;

use async_trait::async_trait;
use confero_config::{JwtSettings, MediasoupSettings};
use confero_core::protocol::TransportDirection;
use confero_core::{
    Ack, AckReply, ClientSignal, JoinTokenVerifier, PeerChannel, PeerId, PeerRegistry, RoomRegistry,
    RouterRegistry, ServerEvent, SignalingDispatcher, WorkerPool,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use mediasoup::data_structures::{DtlsFingerprint, DtlsParameters, DtlsRole};
use mediasoup::rtp_parameters::{
    MediaKind, MimeTypeAudio, RtcpParameters, RtpCapabilities, RtpCodecParameters, RtpCodecParametersParameters,
    RtpEncodingParameters, RtpHeaderExtensionParameters, RtpHeaderExtensionUri, RtpParameters,
};
use serde::Serialize;
use serde_json::Value;

fn mediasoup_settings() -> MediasoupSettings {
    MediasoupSettings {
        num_workers: 1,
        listen_ip: "127.0.0.1".into(),
        announced_ip: None,
        rtc_base_port: 33000,
        rtc_port_range_size: 100,
        max_peers_per_room: 150,
        initial_available_outgoing_bitrate: 1_000_000,
        min_available_outgoing_bitrate: 600_000,
        max_incoming_bitrate: 1_500_000,
        max_sctp_message_size: 262_144,
    }
}

fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "dispatcher-flow-test-secret".into(),
        issuer: String::new(),
    }
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: i64,
}

fn join_token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"dispatcher-flow-test-secret")).unwrap()
}

struct NullChannel;

#[async_trait]
impl PeerChannel for NullChannel {
    async fn send(&self, _event: ServerEvent) {}
}

async fn build_dispatcher() -> SignalingDispatcher {
    let worker_pool = WorkerPool::new(&mediasoup_settings()).await.expect("worker pool should start");
    let routers = Arc::new(RouterRegistry::new(Arc::clone(&worker_pool)));
    let rooms = Arc::new(RoomRegistry::new());
    let peers = Arc::new(PeerRegistry::new());
    let auth = Arc::new(JoinTokenVerifier::new(jwt_settings()));
    SignalingDispatcher {
        worker_pool,
        routers,
        rooms,
        peers,
        auth,
        mediasoup_settings: mediasoup_settings(),
    }
}

async fn send(dispatcher: &SignalingDispatcher, peer_id: PeerId, channel: Arc<dyn PeerChannel>, signal: ClientSignal) -> AckReply {
    let (ack, rx) = Ack::new();
    dispatcher.handle(peer_id, channel, signal, ack).await;
    rx.await.expect("every handler answers its Ack before returning")
}

fn ok_payload(reply: AckReply) -> Value {
    match reply {
        AckReply::Ok(v) => v,
        AckReply::Err { error } => panic!("expected a successful ack, got error: {error}"),
    }
}

fn test_dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint::Sha256 {
            value: [
                0x82, 0x5A, 0x68, 0x3D, 0x36, 0xC3, 0x0A, 0xDE, 0xAF, 0xE7, 0x32, 0x43, 0xD2, 0x88, 0x83, 0x57, 0xAC,
                0x2D, 0x65, 0xE5, 0x80, 0xC4, 0xB6, 0xFB, 0xAF, 0x1A, 0xA0, 0x21, 0x9F, 0x6D, 0x0C, 0xAD,
            ],
        }],
    }
}

/// An Opus producer announcement shaped the way a real client would send one
/// — this mime type and clock rate are part of the fixed router codec set.
fn audio_producer_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("AUDIO".to_string()),
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type: 111,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![RtpHeaderExtensionParameters {
            uri: RtpHeaderExtensionUri::Mid,
            id: 10,
            encrypt: false,
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(11111111),
            ..RtpEncodingParameters::default()
        }],
        rtcp: RtcpParameters {
            cname: Some("DISPATCHERFLOWTEST".to_string()),
            ..RtcpParameters::default()
        },
    }
}

#[tokio::test]
async fn join_create_transport_produce_consume_round_trip() {
    let dispatcher = build_dispatcher().await;
    let room_id = "room-flow".to_string();

    let producer_peer = PeerId::new();
    let producer_channel: Arc<dyn PeerChannel> = Arc::new(NullChannel);

    let join_reply = send(
        &dispatcher,
        producer_peer,
        producer_channel.clone(),
        ClientSignal::JoinRoom {
            token: join_token("alice"),
            room_id: room_id.clone(),
            user_name: Some("Alice".to_string()),
        },
    )
    .await;
    let join_data = ok_payload(join_reply);
    assert_eq!(join_data["isOwner"], true);
    let router_rtp_capabilities = join_data["routerRtpCapabilities"].clone();

    let send_transport_reply = send(
        &dispatcher,
        producer_peer,
        producer_channel.clone(),
        ClientSignal::CreateTransport {
            room_id: room_id.clone(),
            direction: TransportDirection::Send,
        },
    )
    .await;
    let send_transport_id = ok_payload(send_transport_reply)["id"].as_str().unwrap().to_string();

    let connect_reply = send(
        &dispatcher,
        producer_peer,
        producer_channel.clone(),
        ClientSignal::ConnectTransport {
            transport_id: send_transport_id.clone(),
            dtls_parameters: test_dtls_parameters(),
        },
    )
    .await;
    assert!(matches!(connect_reply, AckReply::Ok(_)));

    let produce_reply = send(
        &dispatcher,
        producer_peer,
        producer_channel.clone(),
        ClientSignal::Produce {
            transport_id: send_transport_id,
            kind: MediaKind::Audio,
            rtp_parameters: audio_producer_rtp_parameters(),
            app_data: Value::Null,
        },
    )
    .await;
    let producer_id = ok_payload(produce_reply)["id"].as_str().unwrap().to_string();

    let consumer_peer = PeerId::new();
    let consumer_channel: Arc<dyn PeerChannel> = Arc::new(NullChannel);

    let join_reply = send(
        &dispatcher,
        consumer_peer,
        consumer_channel.clone(),
        ClientSignal::JoinRoom {
            token: join_token("bob"),
            room_id: room_id.clone(),
            user_name: Some("Bob".to_string()),
        },
    )
    .await;
    let join_data = ok_payload(join_reply);
    assert_eq!(join_data["isOwner"], false);
    let existing_producers = join_data["existingProducers"].as_array().unwrap();
    assert_eq!(existing_producers.len(), 1, "bob should see alice's producer already in the room");

    let recv_transport_reply = send(
        &dispatcher,
        consumer_peer,
        consumer_channel.clone(),
        ClientSignal::CreateTransport {
            room_id: room_id.clone(),
            direction: TransportDirection::Recv,
        },
    )
    .await;
    let recv_transport_id = ok_payload(recv_transport_reply)["id"].as_str().unwrap().to_string();

    let connect_recv_reply = send(
        &dispatcher,
        consumer_peer,
        consumer_channel.clone(),
        ClientSignal::ConnectTransport {
            transport_id: recv_transport_id,
            dtls_parameters: test_dtls_parameters(),
        },
    )
    .await;
    assert!(matches!(connect_recv_reply, AckReply::Ok(_)));

    let rtp_capabilities: RtpCapabilities = serde_json::from_value(router_rtp_capabilities).unwrap();
    let consume_reply = send(
        &dispatcher,
        consumer_peer,
        consumer_channel.clone(),
        ClientSignal::Consume {
            producer_id: producer_id.clone(),
            rtp_capabilities,
        },
    )
    .await;
    let consume_data = ok_payload(consume_reply);
    assert_eq!(consume_data["producerId"], producer_id);
    assert_eq!(consume_data["producerPaused"], false);
}

#[tokio::test]
async fn joining_an_unknown_peer_context_is_rejected_before_auth() {
    let dispatcher = build_dispatcher().await;
    let peer_id = PeerId::new();
    let channel: Arc<dyn PeerChannel> = Arc::new(NullChannel);

    // No joinRoom has happened yet for this peer, so any other message must
    // be rejected as peer-not-found rather than routed to a handler that
    // assumes registry state exists.
    let reply = send(
        &dispatcher,
        peer_id,
        channel,
        ClientSignal::ToggleHandRaise,
    )
    .await;
    assert!(matches!(reply, AckReply::Err { .. }));
}
