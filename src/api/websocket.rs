//! WebSocket fan-out of game events.
//!
//! Each connection subscribes to the broadcast bus. Lifecycle events go to
//! everyone; per-player events are filtered when the client identifies
//! itself with a `playerId` query parameter. A freshly-connected client is
//! sent the current round snapshot so it can render without waiting for
//! the next tick.

use super::handlers::AppState;
use crate::events::GameEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    #[serde(default)]
    pub player_id: Option<String>,
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.player_id))
}

fn should_send(event: &GameEvent, player_filter: &Option<String>) -> bool {
    match (event.player_id(), player_filter) {
        // Lifecycle events go to every connection.
        (None, _) => true,
        // Anonymous connections see the full per-player stream.
        (Some(_), None) => true,
        (Some(event_player), Some(filter)) => event_player == filter,
    }
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, player_filter: Option<String>) {
    let client_id = generate_client_id();
    info!("websocket client {} connected", client_id);

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    // Snapshot first, so the client can render the in-progress round.
    let snapshot = state.scheduler.snapshot();
    let welcome = serde_json::json!({ "type": "snapshot", "state": snapshot });
    if sender
        .send(Message::Text(welcome.to_string()))
        .await
        .is_err()
    {
        warn!("client {} dropped before the snapshot was sent", client_id);
        return;
    }

    let client_id_for_recv = client_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("client {} requested close", client_id_for_recv);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("websocket error from client {}: {}", client_id_for_recv, e);
                    break;
                }
            }
        }
    });

    let client_id_for_send = client_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !should_send(&event, &player_filter) {
                        continue;
                    }
                    let message = match serde_json::to_string(&event) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(message).await.is_err() {
                        debug!("client {} disconnected", client_id_for_send);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "client {} lagged; skipped {} events",
                        client_id_for_send, skipped
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = receive_task => {}
        _ = send_task => {}
    }
    info!("websocket client {} disconnected", client_id);
}

fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("ws_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
