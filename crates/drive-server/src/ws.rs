//! WebSocket progress channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{debug, info, warn};

use crate::handlers::AppState;
use crate::progress::ProgressEvent;

/// GET /ws/{client_id}
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| progress_session(state, client_id, socket))
}

fn encode(event: &ProgressEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode progress event: {}", e);
            None
        }
    }
}

async fn progress_session(state: AppState, client_id: String, mut socket: WebSocket) {
    let mut channel = state.progress.register(&client_id);
    info!("Progress channel connected: {}", client_id);

    loop {
        tokio::select! {
            event = channel.receiver.recv() => {
                // Sender dropped: a newer connection took over this channel.
                let Some(event) = event else { break };
                let Some(message) = encode(&event) else { continue };
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.as_str().trim() == "ping" => {
                        let Some(pong) = encode(&ProgressEvent::Pong) else { continue };
                        if socket.send(pong).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Progress channel {} errored: {}", client_id, e);
                        break;
                    }
                }
            }
        }
    }

    state
        .progress
        .unregister_connection(&client_id, channel.connection_id);
    info!("Progress channel disconnected: {}", client_id);
}
