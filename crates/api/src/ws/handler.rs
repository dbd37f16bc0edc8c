use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use fedgrid_coordinator::protocol::Inbound;
use fedgrid_coordinator::Coordinator;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

/// How often the server pings each connection to keep proxies from
/// dropping idle sockets.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Optional query parameters on the WebSocket upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Durable device identity; a reconnecting device passes it so the
    /// coordinator can rebind before the capability report arrives.
    pub uuid: Option<Uuid>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the coordinator and
/// managed by two tasks (sender + receiver).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator, query.uuid))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the coordinator (which replies with
///      the initial-sync messages).
///   2. Spawns a sender task that serializes outbound messages and pings on
///      an interval.
///   3. Dispatches inbound messages to the coordinator on the current task.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>, uuid: Option<Uuid>) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.connect(conn_id, uuid, tx).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: serialize channel messages to the WebSocket sink and
    // ping periodically.
    let sender_conn_id = conn_id;
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // first tick completes immediately
        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else {
                        // Channel closed: coordinator shutdown.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    };
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(conn_id = %sender_conn_id, error = %e, "Outbound serialization failed");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Receiver loop: dispatch inbound messages to the coordinator.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Text(text)) => {
                dispatch_message(&coordinator, conn_id, &text).await;
            }
            Ok(_other) => {
                // Binary and ping frames are not part of the protocol.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: mark disconnected (reclaiming in-flight jobs) and stop the
    // sender task.
    coordinator.disconnect(conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Parse one inbound frame and hand it to the coordinator.
///
/// Rejected operations (stale connections, invalid transitions) are logged
/// and dropped; the protocol has no per-message error reply.
async fn dispatch_message(coordinator: &Coordinator, conn_id: Uuid, text: &str) {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Unparseable inbound message");
            return;
        }
    };

    match inbound {
        Inbound::DeviceInfo(info) => {
            coordinator.register_device(conn_id, info).await;
        }
        Inbound::UploadStart(upload) => {
            if let Err(e) = coordinator.submit_upload(conn_id, upload).await {
                tracing::warn!(conn_id = %conn_id, error = %e, "upload_start rejected");
            }
        }
        Inbound::JobResult(result) => {
            let job_id = result.id;
            if let Err(e) = coordinator.job_result(conn_id, result).await {
                tracing::warn!(conn_id = %conn_id, job_id, error = %e, "job_result rejected");
            }
        }
    }
}
