use axum::{
    extract::{State, WebSocketUpgrade, ws::Message},
    response::Response,
};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use confero_core::{Ack, AckReply, ClientSignal, PeerId};

use crate::state::AppState;
use crate::ws::channel::WsPeerChannel;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let peer_id = PeerId::new();
    let (sink, mut receiver) = socket.split();
    let channel = WsPeerChannel::new(sink);

    info!(%peer_id, "websocket connected");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_frame(&state, peer_id, channel.clone(), &text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(%peer_id, %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    state.dispatcher.handle_disconnect(peer_id).await;
    info!(%peer_id, "websocket disconnected");
}

async fn handle_frame(
    state: &AppState,
    peer_id: PeerId,
    channel: std::sync::Arc<WsPeerChannel>,
    text: &str,
) {
    let raw: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(%peer_id, %e, "dropping unparseable frame");
            return;
        }
    };

    let ack_id = raw.get("ackId").and_then(Value::as_str).map(str::to_string);

    let signal: ClientSignal = match serde_json::from_value(raw) {
        Ok(s) => s,
        Err(e) => {
            debug!(%peer_id, %e, "dropping frame with unknown/invalid message shape");
            if let Some(ack_id) = ack_id {
                reply(&channel, &ack_id, &AckReply::Err { error: "Malformed message".into() }).await;
            }
            return;
        }
    };

    let (ack, rx) = Ack::new();
    state.dispatcher.handle(peer_id, channel.clone(), signal, ack).await;

    // `handle` resolves its `Ack` before returning (every handler answers
    // synchronously within its own call), so this never actually waits.
    if let (Some(ack_id), Ok(reply_payload)) = (ack_id, rx.await) {
        reply(&channel, &ack_id, &reply_payload).await;
    }
}

async fn reply(channel: &WsPeerChannel, ack_id: &str, payload: &AckReply) {
    let (ok, data, error) = match payload {
        AckReply::Ok(v) => (true, Some(v.clone()), None),
        AckReply::Err { error } => (false, None, Some(error.clone())),
    };
    let frame = json!({
        "ackId": ack_id,
        "ok": ok,
        "data": data,
        "error": error,
    });
    channel.send_raw(frame.to_string()).await;
}
