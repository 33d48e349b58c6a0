use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque room identifier, supplied by the caller on `joinRoom`.
pub type RoomId = String;

/// Identity of the authenticated principal behind a peer, decoded from the join token's `sub`.
pub type UserId = String;

/// Identity of one connected client. Distinct from `UserId` because the same user
/// may hold multiple simultaneous peers (multi-tab, multi-device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
