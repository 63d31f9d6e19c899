//! WebSocket upgrade and session lifecycle, from upgrade through
//! disconnect for one connected client.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use huddle_core::ConnectionId;
use huddle_realtime::{ClientConnection, ServerEvent};

use crate::server::AppState;

/// Query parameters accepted by `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer credential, supplied at connect time.
    pub token: Option<String>,
}

/// GET /ws: upgrade to a realtime session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if state.sessions.connection_count() >= state.config.max_connections {
        warn!("connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let token = query.token.unwrap_or_default();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, token, state))
}

/// Run a WebSocket session for a connected client.
///
/// 1. Authenticates the token; a failure gets one `error` frame and the
///    socket is closed without any registration
/// 2. Registers with the session manager (room auto-join, presence)
/// 3. Sends `connection:ready`
/// 4. Forwards outbound frames and periodic pings from one task
/// 5. Dispatches inbound frames through the router in arrival order
/// 6. Unregisters on disconnect
#[instrument(skip_all)]
pub async fn run_ws_session(ws: WebSocket, token: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let identity = match state.gate.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            info!(error = %e, "rejecting unauthenticated connection");
            counter!("realtime_auth_failures_total").increment(1);
            if let Ok(json) = serde_json::to_string(&ServerEvent::error(e.to_string())) {
                let _ = ws_tx.send(Message::Text(json.into())).await;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(1024);
    let connection = Arc::new(ClientConnection::new(
        ConnectionId::new(),
        identity.user_id.clone(),
        send_tx,
    ));
    let conn_id = connection.id.clone();
    info!(conn_id = %conn_id, user_id = %connection.user_id, "client connected");

    state.sessions.register(Arc::clone(&connection), &identity).await;

    if let Ok(json) = serde_json::to_string(&ServerEvent::connection_ready(&connection.user_id)) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder plus ping/liveness in one task.
    let ping_interval = Duration::from_secs(state.config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(state.config.heartbeat_timeout_secs);
    let outbound_conn = Arc::clone(&connection);
    let outbound = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound frames, dispatched in arrival order.
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                connection.mark_alive();
                state.router.dispatch(text.as_str(), &connection).await;
            }
            Message::Binary(data) => {
                connection.mark_alive();
                match std::str::from_utf8(&data) {
                    Ok(text) => state.router.dispatch(text, &connection).await,
                    Err(_) => {
                        info!(len = data.len(), "ignoring non-UTF8 binary frame");
                    }
                }
            }
            Message::Ping(_) | Message::Pong(_) => connection.mark_alive(),
            Message::Close(_) => {
                info!(conn_id = %conn_id, "client sent close frame");
                break;
            }
        }
    }

    info!(conn_id = %conn_id, "client disconnected");
    counter!("realtime_disconnections_total").increment(1);
    histogram!("realtime_connection_duration_seconds").record(connection.age().as_secs_f64());
    outbound.abort();
    state.sessions.unregister(&conn_id).await;
}
