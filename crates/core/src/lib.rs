pub mod ack;
pub mod auth;
pub mod cleanup;
pub mod codecs;
pub mod dispatcher;
pub mod error;
pub mod event_fanout;
pub mod ids;
pub mod peer_registry;
pub mod protocol;
pub mod room_registry;
pub mod router_registry;
pub mod worker_pool;

pub use ack::{Ack, AckReply};
pub use auth::JoinTokenVerifier;
pub use dispatcher::SignalingDispatcher;
pub use error::CoreError;
pub use ids::{PeerId, RoomId, UserId};
pub use peer_registry::{PeerChannel, PeerRegistry, PeerState};
pub use protocol::{ClientSignal, ServerEvent};
pub use room_registry::RoomRegistry;
pub use router_registry::RouterRegistry;
pub use worker_pool::WorkerPool;
