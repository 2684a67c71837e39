//! End-to-end tests against a real listener.

use futures_util::{SinkExt, StreamExt};
use parlor_protocol::{codec, ServerFrame};
use parlor_server::{serve, AppState, Config};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.database_url = "memory".into();
    config.auth.bcrypt_cost = 4;
    config.metrics.enabled = false;
    config
}

async fn spawn_server(config: Config) -> SocketAddr {
    let state = Arc::new(AppState::open(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state));
    addr
}

async fn login(addr: SocketAddr, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap()
}

async fn token_for(addr: SocketAddr, username: &str) -> String {
    let response = login(addr, username, "pw").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn open_ws(addr: SocketAddr, query: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?{query}")).await.unwrap();
    ws
}

/// Next non-ping JSON event.
async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            let event: Value = serde_json::from_str(&text).unwrap();
            if event["event"] != "ping" {
                return event;
            }
        }
    }
}

/// Skip events until one named `name` arrives.
async fn next_named(ws: &mut Ws, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_chat_flow() {
    let addr = spawn_server(test_config()).await;
    let alice_token = token_for(addr, "alice").await;
    let bob_token = token_for(addr, "bob").await;

    let mut alice = open_ws(addr, &format!("token={alice_token}")).await;
    let connected = next_event(&mut alice).await;
    assert_eq!(connected["event"], "connected");
    assert_eq!(connected["data"]["username"], "alice");
    assert_eq!(next_event(&mut alice).await["data"]["users"], json!(["alice"]));

    let mut bob = open_ws(addr, &format!("token={bob_token}")).await;
    assert_eq!(next_event(&mut bob).await["event"], "connected");
    assert_eq!(next_event(&mut bob).await["data"]["users"], json!(["alice", "bob"]));
    assert_eq!(next_event(&mut alice).await["data"]["users"], json!(["alice", "bob"]));

    // Broadcast reaches both, sender included.
    send(
        &mut alice,
        json!({ "event": "send_message", "data": { "message": "  hello all  " } }),
    )
    .await;
    for ws in [&mut alice, &mut bob] {
        let event = next_event(ws).await;
        assert_eq!(event["event"], "new_message");
        assert_eq!(event["data"]["sender"], "alice");
        assert_eq!(event["data"]["recipient"], Value::Null);
        assert_eq!(event["data"]["message"], "hello all");
    }

    // Direct message: recipient plus echo, identical payloads.
    send(
        &mut alice,
        json!({ "event": "send_message", "data": { "recipient": "bob", "message": "psst" } }),
    )
    .await;
    let to_bob = next_event(&mut bob).await;
    let echo = next_event(&mut alice).await;
    assert_eq!(to_bob, echo);
    assert_eq!(to_bob["data"]["recipient"], "bob");

    // Empty bodies vanish silently; the next message is delivered as usual.
    send(
        &mut alice,
        json!({ "event": "send_message", "data": { "message": "   " } }),
    )
    .await;
    send(
        &mut alice,
        json!({ "event": "send_message", "data": { "recipient": "", "message": "second" } }),
    )
    .await;
    assert_eq!(next_event(&mut bob).await["data"]["message"], "second");

    let client = reqwest::Client::new();
    let group: Value = client
        .get(format!("http://{addr}/history/group"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let bodies: Vec<_> = group
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(bodies, vec!["hello all", "second"]);

    let direct: Value = client
        .get(format!("http://{addr}/history/alice"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(direct.as_array().unwrap().len(), 1);
    assert_eq!(direct[0], to_bob["data"]);
}

#[tokio::test]
async fn test_login_errors() {
    let addr = spawn_server(test_config()).await;

    let first = login(addr, "alice", "secret").await;
    assert_eq!(first.status(), 200);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["registered"], true);

    let again = login(addr, "alice", "secret").await;
    assert!(again
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("parlor_session=")));
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["registered"], false);

    assert_eq!(login(addr, "alice", "wrong").await.status(), 401);
    assert_eq!(login(addr, "", "secret").await.status(), 400);
    assert_eq!(login(addr, "bob", "").await.status(), 400);
}

#[tokio::test]
async fn test_history_requires_login() {
    let addr = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    let anonymous = client
        .get(format!("http://{addr}/history/group"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 403);

    let bad_token = client
        .get(format!("http://{addr}/history/bob"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_token.status(), 401);

    let token = token_for(addr, "alice").await;
    let with_cookie = client
        .get(format!("http://{addr}/history/group"))
        .header("cookie", format!("parlor_session={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(with_cookie.status(), 200);
}

#[tokio::test]
async fn test_unauthenticated_socket() {
    let addr = spawn_server(test_config()).await;

    let mut ws = open_ws(addr, "").await;
    let connected = next_event(&mut ws).await;
    assert_eq!(connected["data"]["username"], Value::Null);

    send(
        &mut ws,
        json!({ "event": "send_message", "data": { "message": "hi" } }),
    )
    .await;
    let error = next_event(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], 1002);

    ws.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(next_event(&mut ws).await["data"]["code"], 1001);

    // Late authentication with a connect frame.
    let token = token_for(addr, "carol").await;
    send(&mut ws, json!({ "event": "connect", "data": { "token": token } })).await;
    assert_eq!(next_event(&mut ws).await["data"]["users"], json!(["carol"]));
}

#[tokio::test]
async fn test_supersede_and_logout() {
    let addr = spawn_server(test_config()).await;
    let alice_token = token_for(addr, "alice").await;
    let bob_token = token_for(addr, "bob").await;

    let mut bob = open_ws(addr, &format!("token={bob_token}")).await;
    let mut first = open_ws(addr, &format!("token={alice_token}")).await;
    next_named(&mut first, "user_status").await;

    let mut second = open_ws(addr, &format!("token={alice_token}")).await;
    let evicted = next_named(&mut first, "evicted").await;
    assert_eq!(evicted["data"]["reason"], "superseded by a newer connection");
    assert_eq!(next_named(&mut second, "user_status").await["data"]["users"], json!(["alice", "bob"]));

    let logout = reqwest::Client::new()
        .post(format!("http://{addr}/logout"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 200);

    assert_eq!(
        next_named(&mut second, "evicted").await["data"]["reason"],
        "logged out"
    );
    loop {
        let status = next_named(&mut bob, "user_status").await;
        if status["data"]["users"] == json!(["bob"]) {
            break;
        }
    }

    let again = reqwest::Client::new()
        .post(format!("http://{addr}/logout"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 401);
}

#[tokio::test]
async fn test_msgpack_encoding() {
    let addr = spawn_server(test_config()).await;
    let token = token_for(addr, "alice").await;

    let mut ws = open_ws(addr, &format!("token={token}&encoding=msgpack")).await;
    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let Message::Binary(data) = msg else {
        panic!("Expected binary frame, got {:?}", msg);
    };
    match codec::decode::<ServerFrame>(&data).unwrap() {
        ServerFrame::Connected { username, .. } => assert_eq!(username.as_deref(), Some("alice")),
        other => panic!("Expected connected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let addr = spawn_server(config).await;

    let _held = open_ws(addr, "").await;
    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("Expected 503, got {:?}", other.map(|_| ())),
    }
}
