//! WebSocket endpoint for chat streaming.
//!
//! Flow:
//! 1. Client connects to `/ws/chat?token=<access_token>`
//! 2. Server authenticates, registers the connection (closing any older
//!    one for the same user), and sends `{"type":"connected"}`
//! 3. A writer task drains the outbound channel; a heartbeat task pings
//!    every 30 s; the reader loop handles `ping` and `stop_generation`

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use parley_domain::wire::event_type;

use crate::state::AppState;
use crate::ws::connection::Outbound;
use crate::ws::envelope::Envelope;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Client → server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    StopGeneration { session_id: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws/chat — authenticate the token and upgrade.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    let claims = match state.auth.verify_access(&token) {
        Ok(c) => c,
        Err(e) => {
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let user = match state.store.get_user(claims.user_id).await {
        Ok(Some(u)) if u.is_active => u,
        Ok(_) => return (StatusCode::FORBIDDEN, "user inactive").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed during ws connect");
            return (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<Outbound>(state.config.agent.event_channel_capacity);
    let conn_id = state.connections.register(user_id, outbound_tx.clone());

    tracing::info!(user_id, conn_id, "chat WebSocket connected");

    // Greeting, outside any turn.
    let _ = outbound_tx
        .send(Outbound::Text(json!({"type": "connected"}).to_string()))
        .await;

    // Writer task: forwards outbound channel frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Text(text) => {
                    if ws_sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Heartbeat task: ping every interval until the channel closes.
    let heartbeat_tx = outbound_tx.clone();
    let heartbeat_interval =
        std::time::Duration::from_secs(state.config.gateway.heartbeat_interval_secs);
    let heartbeat = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            if heartbeat_tx
                .send(Outbound::Text(json!({"type": "ping"}).to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Reader loop.
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Ping) => {
                let pong = Envelope::standalone(event_type::PONG, &json!({"type": "pong"}));
                let _ = outbound_tx.send(Outbound::Text(pong.to_json())).await;
            }
            Ok(ClientMessage::StopGeneration { session_id }) => {
                let stopped = state.cancel_map.cancel(user_id, &session_id);
                tracing::info!(user_id, session_id = %session_id, stopped, "stop_generation");
            }
            Err(e) => {
                tracing::debug!(user_id, error = %e, "unrecognized client message");
            }
        }
    }

    // Teardown: only unregister if we are still the live connection.
    state.connections.unregister(user_id, conn_id);
    heartbeat.abort();
    writer.abort();
    tracing::info!(user_id, conn_id, "chat WebSocket disconnected");
}
