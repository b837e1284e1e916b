use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app_state::AppState;

/// Drives one signaling connection from upgrade to close.
///
/// The writer drains the relay's outbox for this connection and pings on the
/// heartbeat interval. The reader feeds text frames to the relay in arrival
/// order and gives up once the peer has been silent for the client timeout.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let client_id = state.relay.lock().await.connect(tx);

    let heartbeat = state.config.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let relay = state.relay.clone();
    let recv_id = client_id.clone();
    let timeout: Duration = state.config.client_timeout;
    let mut recv_task = tokio::spawn(async move {
        loop {
            let frame = match tokio::time::timeout(timeout, receiver.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    tracing::debug!(client_id = %recv_id, error = %e, "websocket error");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(client_id = %recv_id, "no traffic within client timeout, closing");
                    break;
                }
            };
            match frame {
                Message::Text(text) => relay.lock().await.handle_text(&recv_id, &text),
                Message::Binary(_) => {
                    tracing::debug!(client_id = %recv_id, "ignoring binary frame");
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.relay.lock().await.disconnect(&client_id);
}
