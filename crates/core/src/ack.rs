use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CoreError;

/// Wire shape of an acknowledgment reply: either a domain-specific success
/// payload or `{error: string}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AckReply {
    Ok(Value),
    Err { error: String },
}

/// A one-shot reply handle bound to an inbound message. Every dispatcher
/// handler must consume it exactly once — `ok`/`err` take `self` by value, so
/// the compiler rejects a double-reply or a handler that drops it silently
/// (the `must_use` lint on `Ack` catches the latter).
#[must_use = "an Ack must be answered exactly once"]
pub struct Ack {
    reply: oneshot::Sender<AckReply>,
}

impl Ack {
    pub fn new() -> (Self, oneshot::Receiver<AckReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { reply: tx }, rx)
    }

    pub fn ok<T: Serialize>(self, payload: T) {
        let value = serde_json::to_value(payload).unwrap_or(Value::Null);
        let _ = self.reply.send(AckReply::Ok(value));
    }

    pub fn err(self, error: CoreError) {
        let _ = self.reply.send(AckReply::Err {
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ok_reply_round_trips_payload() {
        let (ack, rx) = Ack::new();
        ack.ok(serde_json::json!({"left": true}));
        match rx.await.unwrap() {
            AckReply::Ok(v) => assert_eq!(v, serde_json::json!({"left": true})),
            AckReply::Err { .. } => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn err_reply_carries_error_string() {
        let (ack, rx) = Ack::new();
        ack.err(CoreError::RoomFull);
        match rx.await.unwrap() {
            AckReply::Err { error } => assert_eq!(error, "Room is full"),
            AckReply::Ok(_) => panic!("expected Err"),
        }
    }
}
