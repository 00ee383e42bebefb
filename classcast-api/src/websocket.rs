//! WebSocket event channel.
//!
//! One reader and one writer task per connection. Events from the hub
//! arrive on a bounded queue (the hub drops the connection if it fills);
//! the writer drains that queue to the socket and pings periodically. The
//! reader parses JSON commands, enforces the join-first handshake, and
//! disconnects after prolonged silence. A closed or timed-out connection
//! always reaches the hub as a leave.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use classcast_core::models::ConnectionId;
use classcast_core::room::{ClientCommand, ServerEvent};
use classcast_livestream::stream_key_from_path;

use crate::http::{AppError, AppState};

const PING_INTERVAL: Duration = Duration::from_secs(20);

/// WebSocket handler for room realtime events
///
/// `ws://host/ws/room/{stream_key}`. The first command on the socket must
/// be `join`; everything else before that is dropped.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    // The room key doubles as a file-name component, same rules as the
    // publish path.
    let Some(stream_key) = stream_key_from_path(&stream_key) else {
        return Err(AppError::bad_request("Invalid stream key"));
    };

    // Signaling traffic is tiny; cap frames well below the default.
    Ok(ws
        .max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state, stream_key)))
}

async fn handle_socket(socket: WebSocket, state: AppState, stream_key: String) {
    let connection_id = ConnectionId::new();
    info!(%stream_key, %connection_id, "WebSocket connection established");

    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(state.send_queue_capacity);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: hub events -> socket, plus heartbeat pings. Ends when the
    // hub drops our sender (slow-client eviction or disconnect).
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event {}: {e}", event.event_type());
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: commands from the client, with an idle timeout. Pongs and
    // other control frames count as liveness.
    let mut joined = false;
    loop {
        let frame = match tokio::time::timeout(state.idle_timeout, ws_rx.next()).await {
            Err(_) => {
                info!(%connection_id, "Connection idle for {:?}, closing", state.idle_timeout);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(%connection_id, "WebSocket error: {e}");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let command = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        // Protocol violation: drop the message, keep the
                        // connection.
                        info!(%connection_id, "Malformed command, dropping: {e}");
                        continue;
                    }
                };
                match command {
                    ClientCommand::Join { username, role } if !joined => {
                        state
                            .hub
                            .join(&stream_key, connection_id.clone(), username, role, event_tx.clone())
                            .await;
                        joined = true;
                    }
                    ClientCommand::Join { .. } => {
                        debug!(%connection_id, "Duplicate join, dropping");
                    }
                    ClientCommand::Leave => break,
                    command if joined => state.hub.apply(&connection_id, command).await,
                    _ => debug!(%connection_id, "Command before join, dropping"),
                }
            }
            Message::Close(_) => break,
            // Ping is answered by axum; pong and binary just reset the
            // idle timer by arriving.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.hub.disconnect(&connection_id).await;
    writer.abort();
    info!(%stream_key, %connection_id, "WebSocket connection closed");
}
