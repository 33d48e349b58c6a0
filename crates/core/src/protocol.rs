use mediasoup::prelude::{ConsumerLayers, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// Inbound messages a client may send on its WebSocket connection. Every
/// variant except `leaveRoom` is answered with exactly one acknowledgment;
/// `disconnect` (the WebSocket closing) is not a message at all and is
/// handled directly by the connection loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientSignal {
    #[serde(rename = "joinRoom")]
    JoinRoom {
        token: String,
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userName", default)]
        user_name: Option<String>,
    },

    #[serde(rename = "createTransport")]
    CreateTransport {
        #[serde(rename = "roomId")]
        room_id: String,
        direction: TransportDirection,
    },

    #[serde(rename = "connectTransport")]
    ConnectTransport {
        #[serde(rename = "transportId")]
        transport_id: String,
        #[serde(rename = "dtlsParameters")]
        dtls_parameters: DtlsParameters,
    },

    #[serde(rename = "produce")]
    Produce {
        #[serde(rename = "transportId")]
        transport_id: String,
        kind: MediaKind,
        #[serde(rename = "rtpParameters")]
        rtp_parameters: RtpParameters,
        #[serde(rename = "appData", default)]
        app_data: Value,
    },

    #[serde(rename = "consume")]
    Consume {
        #[serde(rename = "producerId")]
        producer_id: String,
        #[serde(rename = "rtpCapabilities")]
        rtp_capabilities: RtpCapabilities,
    },

    #[serde(rename = "resumeConsumer")]
    ResumeConsumer {
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },

    #[serde(rename = "pauseConsumer")]
    PauseConsumer {
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },

    #[serde(rename = "pauseProducer")]
    PauseProducer {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "resumeProducer")]
    ResumeProducer {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "closeProducer")]
    CloseProducer {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "toggleHandRaise")]
    ToggleHandRaise,

    #[serde(rename = "chatMessage")]
    ChatMessage { message: String },

    #[serde(rename = "getExistingProducers")]
    GetExistingProducers,

    #[serde(rename = "getRoomStats")]
    GetRoomStats {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "setConsumerPreferredLayers")]
    SetConsumerPreferredLayers {
        #[serde(rename = "consumerId")]
        consumer_id: String,
        #[serde(rename = "spatialLayer")]
        spatial_layer: u8,
        #[serde(rename = "temporalLayer", default)]
        temporal_layer: Option<u8>,
    },

    #[serde(rename = "endMeeting")]
    EndMeeting {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "leaveRoom")]
    LeaveRoom,
}

impl ClientSignal {
    pub fn consumer_layers(spatial_layer: u8, temporal_layer: Option<u8>) -> ConsumerLayers {
        ConsumerLayers {
            spatial_layer,
            temporal_layer,
        }
    }
}

/// Participant shape broadcast to other peers in a room — never the raw
/// transport/producer/consumer maps or channel handle.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    #[serde(rename = "socketId")]
    pub socket_id: String,
    #[serde(rename = "peerId")]
    pub peer_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "audioEnabled")]
    pub audio_enabled: bool,
    #[serde(rename = "videoEnabled")]
    pub video_enabled: bool,
    #[serde(rename = "screenSharing")]
    pub screen_sharing: bool,
    #[serde(rename = "handRaised")]
    pub hand_raised: bool,
    #[serde(rename = "joinedAt")]
    pub joined_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "isOwner")]
    pub is_owner: bool,
}

/// Outbound events, broadcast via the Event Fan-out component. These never
/// carry an acknowledgment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "participantJoined")]
    ParticipantJoined { participant: ParticipantView },

    #[serde(rename = "participantLeft")]
    ParticipantLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "newProducer")]
    NewProducer {
        #[serde(rename = "producerId")]
        producer_id: String,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        kind: MediaKind,
        #[serde(rename = "userName")]
        user_name: String,
    },

    #[serde(rename = "producerClosed")]
    ProducerClosed {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "producerPaused")]
    ProducerPaused {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "producerResumed")]
    ProducerResumed {
        #[serde(rename = "producerId")]
        producer_id: String,
    },

    #[serde(rename = "consumerClosed")]
    ConsumerClosed {
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },

    #[serde(rename = "consumerPaused")]
    ConsumerPaused {
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },

    #[serde(rename = "consumerResumed")]
    ConsumerResumed {
        #[serde(rename = "consumerId")]
        consumer_id: String,
    },

    #[serde(rename = "handRaiseChanged")]
    HandRaiseChanged {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(rename = "isHandRaised")]
        is_hand_raised: bool,
    },

    #[serde(rename = "newChatMessage")]
    NewChatMessage {
        id: i64,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(rename = "userName")]
        user_name: String,
        message: String,
        timestamp: i64,
    },

    #[serde(rename = "meetingEnded")]
    MeetingEnded { reason: String },
}
