//! End-to-end tests over real sockets: a relay bound to an ephemeral port,
//! driven by tokio-tungstenite clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::{AppState, ServerConfig};
use telecare_shared::types::UserId;
use telecare_store::{ChatStore, SqliteChatStore};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::open_in_memory().unwrap());
        Self::start_with_store(config, store).await
    }

    async fn start_with_store(config: ServerConfig, store: Arc<dyn ChatStore>) -> Self {
        let state = AppState::new(config, store);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(crate::serve_listener(
            listener,
            state.clone(),
            async move {
                let _ = rx.await;
            },
        ));

        Self {
            addr,
            state,
            _shutdown: tx,
        }
    }

    async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket handshake");
        ws
    }

    /// Connect and authenticate, waiting until the binding is visible.
    async fn login(&self, user: i64) -> Client {
        let mut ws = self.connect().await;
        send(&mut ws, json!({"type": "auth", "userId": user})).await;
        self.wait_bound(user).await;
        ws
    }

    async fn wait_bound(&self, user: i64) {
        for _ in 0..100 {
            if self.state.registry.lookup(UserId(user)).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {user} never became bound");
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv_text(ws: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv(ws: &mut Client) -> Value {
    serde_json::from_str(&recv_text(ws).await).unwrap()
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(next.is_err(), "expected no frame, got {next:?}");
}

#[tokio::test]
async fn chat_between_two_online_users() {
    let server = TestServer::start().await;
    let mut alice = server.login(1).await;
    let mut bob = server.login(2).await;

    send(
        &mut alice,
        json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": "Hello doctor"}),
    )
    .await;

    let delivered = recv(&mut bob).await;
    assert_eq!(delivered["type"], "chat");
    assert_eq!(delivered["message"]["content"], "Hello doctor");
    assert_eq!(delivered["message"]["senderId"], 1);
    assert_eq!(delivered["message"]["isRead"], false);

    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "chat_sent");
    assert_eq!(ack["message"], delivered["message"]);

    let stored = server
        .state
        .store
        .get_chat_messages(UserId(1), UserId(2))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(Value::from(stored[0].id.get()), delivered["message"]["id"]);
}

#[tokio::test]
async fn chat_to_offline_user_is_stored_and_acknowledged() {
    let server = TestServer::start().await;
    let mut alice = server.login(1).await;

    send(
        &mut alice,
        json!({"type": "chat", "senderId": 1, "receiverId": 3, "content": "see you tomorrow"}),
    )
    .await;

    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "chat_sent");
    assert_silent(&mut alice).await;

    // The receiver picks it up from history once back online.
    let history = server
        .state
        .store
        .get_chat_messages(UserId(3), UserId(1))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "see you tomorrow");
}

#[tokio::test]
async fn signaling_is_forwarded_verbatim_and_dropped_when_offline() {
    let server = TestServer::start().await;
    let mut alice = server.login(1).await;
    let mut bob = server.login(2).await;

    let offer = r#"{"type":"video_offer","offer":{"type":"offer","sdp":"v=0\r\n"},"targetUserId":2,"fromUserId":1,"fromUserName":"Dr. Alice"}"#;
    alice.send(Message::Text(offer.to_string())).await.unwrap();
    assert_eq!(recv_text(&mut bob).await, offer);

    let answer = r#"{"type":"video_answer","answer":{"type":"answer","sdp":"v=0\r\n"},"targetUserId":1,"fromUserId":2,"fromUserName":"Bob"}"#;
    bob.send(Message::Text(answer.to_string())).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, answer);

    let lost = r#"{"type":"ice_candidate","candidate":{"candidate":"c"},"targetUserId":42}"#;
    alice.send(Message::Text(lost.to_string())).await.unwrap();
    assert_silent(&mut alice).await;
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn malformed_frames_get_an_error_and_the_socket_survives() {
    let server = TestServer::start().await;
    let mut alice = server.login(1).await;

    alice.send(Message::Text("{not json".into())).await.unwrap();
    let err = recv(&mut alice).await;
    assert_eq!(err, json!({"type": "error", "message": "Invalid message format"}));

    send(&mut alice, json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": ""})).await;
    let err = recv(&mut alice).await;
    assert_eq!(err["message"], "Message content cannot be empty");

    send(&mut alice, json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": "ok"})).await;
    assert_eq!(recv(&mut alice).await["type"], "chat_sent");
}

#[tokio::test]
async fn newer_socket_takes_over_and_old_close_does_not_unbind() {
    let server = TestServer::start().await;
    let mut alice = server.login(1).await;
    let mut bob_old = server.login(2).await;
    let first = server.state.registry.lookup(UserId(2)).await.unwrap().id();

    let mut bob_new = server.connect().await;
    send(&mut bob_new, json!({"type": "auth", "userId": 2})).await;
    for _ in 0..100 {
        if server.state.registry.lookup(UserId(2)).await.map(|h| h.id()) != Some(first) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    bob_old.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.state.registry.lookup(UserId(2)).await.is_some());

    send(
        &mut alice,
        json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": "which device?"}),
    )
    .await;
    assert_eq!(recv(&mut bob_new).await["message"]["content"], "which device?");
}

#[tokio::test]
async fn disconnect_unbinds_the_user() {
    let server = TestServer::start().await;
    let mut bob = server.login(2).await;
    bob.close(None).await.unwrap();

    for _ in 0..100 {
        if server.state.registry.lookup(UserId(2)).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user 2 still bound after close");
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let config = ServerConfig {
        max_frame_bytes: 128,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(config).await;
    let mut alice = server.login(1).await;

    let content = "x".repeat(256);
    send(
        &mut alice,
        json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": content}),
    )
    .await;
    assert_eq!(recv(&mut alice).await["message"], "Message too large");

    send(
        &mut alice,
        json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": "short"}),
    )
    .await;
    assert_eq!(recv(&mut alice).await["type"], "chat_sent");
}

#[tokio::test]
async fn frame_past_the_transport_limit_closes_the_socket() {
    let config = ServerConfig {
        max_frame_bytes: 128,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(config).await;
    let mut alice = server.login(1).await;

    // Four times the frame limit is where the WebSocket layer gives up.
    let content = "x".repeat(1024);
    let _ = alice
        .send(Message::Text(
            json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": content})
                .to_string(),
        ))
        .await;

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Text(text))) => panic!("unexpected envelope: {text}"),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open");

    for _ in 0..100 {
        if server.state.registry.lookup(UserId(1)).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user 1 still bound after transport close");
}

#[tokio::test]
async fn connection_limit_refuses_extra_sockets() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(config).await;
    let _first = server.connect().await;

    let refused = connect_async(format!("ws://{}/ws", server.addr)).await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn history_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telecare.db");

    {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::open_at(&path).unwrap());
        let server = TestServer::start_with_store(ServerConfig::default(), store).await;
        let mut alice = server.login(1).await;
        send(
            &mut alice,
            json!({"type": "chat", "senderId": 1, "receiverId": 2, "content": "follow-up on Monday"}),
        )
        .await;
        assert_eq!(recv(&mut alice).await["type"], "chat_sent");
    }

    let reopened = SqliteChatStore::open_at(&path).unwrap();
    let history = reopened.get_chat_messages(UserId(2), UserId(1)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "follow-up on Monday");
}
