//! WebSocket handler for the topic relay.
//!
//! Handles WebSocket connections, dispatches client messages to the
//! connection manager and keeps idle sockets honest with pings.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// What the writer task puts on the wire.
enum Outgoing {
    Message(ServerMessage),
    Ping,
}

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages and pings
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect or when a ping goes unanswered
pub async fn handle_websocket_connection(
    socket: WebSocket,
    conn_manager: Arc<ConnectionManager>,
    ping_interval: Duration,
) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for messages addressed to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if forward_tx.send(Outgoing::Message(msg)).is_err() {
                break;
            }
        }
    });

    // Spawn task to write outgoing messages to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            let frame = match out {
                Outgoing::Ping => Message::Ping(Vec::new().into()),
                Outgoing::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!("Failed to serialize WebSocket message: {}", e);
                        continue;
                    }
                },
            };
            if let Err(e) = ws_sender.send(frame).await {
                tracing::warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut alive = true;
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(result) = incoming else { break };
                alive = true;
                match result {
                    Ok(Message::Text(text)) => {
                        if let Some(response) = process_message(&text, &conn_manager, &conn_id) {
                            conn_manager.send_to(&conn_id, response);
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
                        conn_manager.send_to(&conn_id, ServerMessage::error("binary messages are not supported"));
                    }
                    Ok(Message::Ping(data)) => {
                        // Axum answers pings on its own
                        tracing::trace!("Received ping: {} bytes", data.len());
                    }
                    Ok(Message::Pong(_)) => {
                        tracing::trace!("Received pong");
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if !std::mem::replace(&mut alive, false) {
                    tracing::info!(conn_id = %conn_id, "Ping unanswered, closing connection");
                    break;
                }
                if out_tx.send(Outgoing::Ping).is_err() {
                    break;
                }
            }
        }
    }

    // Clean up
    conn_manager.unregister(&conn_id);
    forward_task.abort();
    drop(out_tx);
    if tokio::time::timeout(Duration::from_secs(1), send_task).await.is_err() {
        tracing::debug!(conn_id = %conn_id, "Writer did not finish in time");
    }

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the direct response, if any.
fn process_message(
    text: &str,
    conn_manager: &ConnectionManager,
    conn_id: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(format!("Invalid message format: {}", e)));
        }
    };

    match client_msg {
        ClientMessage::Subscribe { topics } => {
            conn_manager.subscribe(conn_id, &topics);
            None
        }
        ClientMessage::Unsubscribe { topics } => {
            conn_manager.unsubscribe(conn_id, &topics);
            None
        }
        ClientMessage::Publish { topic, data } => {
            conn_manager.publish(conn_id, &topic, data);
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}
