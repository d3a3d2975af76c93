//! WebSocket upgrade handler and per-connection lifecycle.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;

use crate::auth::middleware::AuthUser;
use crate::AppState;

use super::connection::Connection;
use super::pump::{self, TypingThrottle};
use super::router;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// Requires a valid session; the extractor rejects with 401 before upgrading.
async fn ws_upgrade(
    auth: AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, auth.user_id))
}

async fn display_name(state: &AppState, user_id: i64) -> String {
    match state.store.find_user(user_id).await {
        Ok(Some(user)) => user.nickname,
        Ok(None) => user_id.to_string(),
        Err(err) => {
            tracing::warn!(user_id, error = %err, "user lookup failed, using id as display name");
            user_id.to_string()
        }
    }
}

/// Runs the reader on this task and the writer on a spawned one. Whichever
/// stops first closes the connection, which stops the other; teardown then
/// runs here exactly once.
async fn handle_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let nickname = display_name(&state, user_id).await;
    let relay = &state.config.relay;
    let (conn, queue) = Connection::new(
        user_id,
        nickname,
        relay.outbound_queue_capacity,
        relay.enqueue_timeout,
    );
    let (ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(pump::run(
        ws_tx,
        queue,
        conn.clone(),
        TypingThrottle::new(relay.typing_throttle),
    ));

    state.presence.connect(conn.clone()).await;
    tracing::info!(user_id, conn_id = %conn.id, "connection established");

    read_loop(&state, &conn, &mut ws_rx).await;

    conn.close();
    if let Err(err) = writer.await {
        tracing::error!(user_id, conn_id = %conn.id, error = %err, "writer task failed");
    }
    let was_current = state.presence.disconnect(&conn).await;
    tracing::info!(user_id, conn_id = %conn.id, was_current, "connection ended");
}

async fn read_loop(
    state: &AppState,
    conn: &Arc<Connection>,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = conn.closed() => return,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => router::handle_text(state, conn, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::debug!(user_id = conn.user_id, error = %err, "ws read error");
                return;
            }
        }
    }
}
