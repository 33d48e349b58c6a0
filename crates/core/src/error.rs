use thiserror::Error;

/// The full error taxonomy the signaling dispatcher can surface to a client as
/// a `{error: string}` acknowledgment. `Display` is the wire string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid or missing join token")]
    Unauthenticated,

    #[error("Room is full")]
    RoomFull,

    #[error("Peer not found")]
    PeerNotFound,

    #[error("Transport not found")]
    TransportNotFound,

    #[error("Producer not found")]
    ProducerNotFound,

    #[error("Consumer not found")]
    ConsumerNotFound,

    #[error("No recv transport created")]
    NoRecvTransport,

    #[error("Cannot consume: incompatible codec capabilities")]
    CodecMismatch,

    #[error("Router not found for room")]
    RouterNotFound,

    #[error("Only the host can end the meeting")]
    NotOwner,

    #[error("{0}")]
    EngineError(String),

    #[error("No media workers available")]
    NoWorkersAvailable,
}
