#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::COOKIE;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use social_api::config::Config;
use social_api::db::memory::MemoryStore;
use social_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const AMY: i64 = 1;
pub const BOB: i64 = 2;
pub const CAT: i64 = 3;

/// A store holding three users: amy, bob and cat.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_user(AMY, "amy", Some("/uploads/amy.png"));
    store.add_user(BOB, "bob", None);
    store.add_user(CAT, "cat", None);
    store
}

/// App state over a seeded in-memory store. Must run inside a Tokio runtime.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    test_state_with(Config::for_tests())
}

pub fn test_state_with(config: Config) -> (AppState, Arc<MemoryStore>) {
    let store = seeded_store();
    let state = AppState::new(store.clone(), config);
    (state, store)
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryStore>) {
    let (state, store) = test_state();
    let app = social_api::routes::router().with_state(state.clone());
    (app, state, store)
}

/// Start a real TCP server for WebSocket tests. Runs in the background.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = social_api::routes::router().with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Open `/ws` with a session cookie for `user_id`.
pub async fn connect_as(addr: SocketAddr, store: &MemoryStore, user_id: i64) -> WsClient {
    let token = store.issue_session(user_id);
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(COOKIE, format!("session_token={token}").parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Next text frame, parsed. Panics after two seconds or if the socket closes.
pub async fn next_frame(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame is json");
        }
    }
}

/// Skip frames until one with the given `type` arrives.
pub async fn next_of_type(ws: &mut WsClient, frame_type: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == frame_type {
            return frame;
        }
    }
}

/// All text frames that arrive within `window`.
pub async fn collect_for(ws: &mut WsClient, window: Duration) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + window;
    let mut frames = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, ws.next()).await {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).expect("frame is json"));
        }
    }
    frames
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
