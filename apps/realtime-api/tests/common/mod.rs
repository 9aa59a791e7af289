#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use realtime_api::auth::tokens::Claims;
use realtime_api::config::Config;
use realtime_api::hub::UserId;
use realtime_api::{AppState, RoomId};

pub const SECRET: &str = "integration-test-secret";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Config with the test secret plus any overrides.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("JWT_SECRET".into(), SECRET.into());
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned())
}

fn mint(user_id: UserId, username: &str, token_type: &str, ttl_secs: i64) -> String {
    let claims = Claims {
        user_id,
        username: username.to_string(),
        email: format!("{username}@example.com"),
        token_type: token_type.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// Mint a valid access token for `user_id`.
pub fn mint_token(user_id: UserId) -> String {
    mint(user_id, &format!("user{user_id}"), "access", 3600)
}

pub fn mint_refresh_token(user_id: UserId) -> String {
    mint(user_id, &format!("user{user_id}"), "refresh", 3600)
}

pub fn mint_expired_token(user_id: UserId) -> String {
    mint(user_id, &format!("user{user_id}"), "access", -3600)
}

/// Build the router and its state. Must run inside a runtime.
pub fn test_app(config: Config) -> (Router, AppState) {
    let state = AppState::new(config);
    let app = realtime_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Start a real TCP server for WebSocket testing. Runs in the background.
pub async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let (app, state) = test_app(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub fn ws_url(addr: SocketAddr, room: &str, token: &str) -> String {
    format!("ws://{addr}/ws/rooms/{room}?token={token}")
}

/// Connect `user_id` to `room_id` and wait until the hub lists them online.
pub async fn join(addr: SocketAddr, state: &AppState, user_id: UserId, room_id: RoomId) -> Ws {
    let url = ws_url(addr, &room_id.to_string(), &mint_token(user_id));
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    wait_until(move || async move { state.hub.online_users(&room_id).await.contains(&user_id) }).await;
    ws
}

/// Poll `check` until it holds, failing after five seconds.
pub async fn wait_until<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    time::timeout(Duration::from_secs(5), async {
        while !check().await {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

pub async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// Next application event, skipping control frames.
pub async fn next_event(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("read error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse event"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Assert no application event arrives within `ms` milliseconds.
pub async fn assert_quiet(ws: &mut Ws, ms: u64) {
    let deadline = time::Instant::now() + Duration::from_millis(ms);
    loop {
        match time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got: {other:?}"),
        }
    }
}
