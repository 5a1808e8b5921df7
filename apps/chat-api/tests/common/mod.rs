#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_api::auth::identity::{AccessClaims, JwtIdentity};
use chat_api::config::{Config, HistoryPolicy};
use chat_api::db::store::{MemoryMessageStore, MessageStore, StoreError};
use chat_api::models::chat_message::{ChatMessage, StoredMessage};
use chat_api::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: None,
        port: 0,
        jwt_secret: TEST_SECRET.to_string(),
        jwt_algorithm: Algorithm::HS256,
        history_policy: HistoryPolicy::Empty,
        ws_require_auth: false,
        send_queue_capacity: 64,
        max_message_len: 4000,
        idle_timeout: None,
        snowflake_worker_id: 0,
    }
}

/// Build app state over the given store and config.
pub fn state_with(config: Config, store: Arc<dyn MessageStore>) -> AppState {
    let identity = Arc::new(JwtIdentity::new(&config.jwt_secret, config.jwt_algorithm));
    AppState::new(config, store, identity)
}

/// Build a test AppState with an in-memory message store.
pub fn test_state() -> AppState {
    state_with(test_config(), Arc::new(MemoryMessageStore::default()))
}

/// Build the full application router wired to the given state.
pub fn test_app(state: &AppState) -> Router {
    chat_api::routes::router().with_state(state.clone())
}

/// Mint an access token the way the auth service does.
pub fn mint_token(user_id: &str) -> String {
    let claims = AccessClaims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::minutes(30)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// A store whose appends always fail.
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn append(&self, _message: ChatMessage) -> Result<StoredMessage, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn history(&self, _room_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(Vec::new())
    }

    async fn latest(&self, _room_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(None)
    }
}

/// Start an actual TCP server for WebSocket testing. Runs in the background.
pub async fn start_ws_server(state: &AppState) -> SocketAddr {
    let app = test_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Connect to a chat room and wait until the server has registered the session.
pub async fn join_room(state: &AppState, addr: SocketAddr, room_id: &str, token: Option<&str>) -> Ws {
    let before = state.rooms.member_count(room_id);
    let url = match token {
        Some(token) => format!("ws://{addr}/ws/chat/{room_id}?token={token}"),
        None => format!("ws://{addr}/ws/chat/{room_id}"),
    };
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    wait_until(|| state.rooms.member_count(room_id) > before).await;
    ws
}

/// Poll until `cond` holds, failing the test after five seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !cond() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// Next raw frame, skipping pings and pongs.
pub async fn next_frame(ws: &mut Ws) -> Message {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

/// Next text frame parsed as JSON.
pub async fn recv_json(ws: &mut Ws) -> serde_json::Value {
    let text = next_frame(ws).await.into_text().expect("not text");
    serde_json::from_str(&text).expect("parse frame")
}

/// Assert nothing arrives within a short window.
pub async fn assert_silent(ws: &mut Ws) {
    let res = time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

pub fn close_code(msg: &Message) -> Option<u16> {
    match msg {
        Message::Close(Some(frame)) => Some(u16::from(frame.code)),
        _ => None,
    }
}

pub fn is_handshake_rejection(err: &tungstenite::Error, status: u16) -> bool {
    matches!(err, tungstenite::Error::Http(resp) if resp.status().as_u16() == status)
}
