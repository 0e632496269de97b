use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use game_gateway::{
    adapters::{AppState, BroadcastPublisher, HttpClientAdapter, create_router},
    config::{ServerConfig, ServiceConfig},
    core::GatewayService,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    state: AppState,
    token: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn start() -> Harness {
    let config = ServerConfig::builder()
        .service("chat", ServiceConfig::new("http://127.0.0.1:9"))
        .build()
        .unwrap();
    let gateway = Arc::new(GatewayService::new(Arc::new(config)).unwrap());
    let publisher = BroadcastPublisher::default();
    let state = AppState::new(
        gateway,
        Arc::new(HttpClientAdapter::new().unwrap()),
        Arc::new(publisher.clone()),
    );

    let token = CancellationToken::new();
    state
        .hub
        .clone()
        .start_chat_fanout(publisher.subscribe(), token.child_token());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    let server_token = token.child_token();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
        .unwrap();
    });

    Harness { addr, state, token }
}

async fn connect(addr: SocketAddr) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["message"], "Connected to game gateway");
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn join(ws: &mut Client, channel: &str) {
    send(ws, json!({"type": "join_channel", "channel": channel})).await;
    let reply = next_json(ws).await;
    assert_eq!(reply["type"], "channel_joined");
    assert_eq!(reply["channel"], channel);
}

#[tokio::test]
async fn envelope_exchanges() {
    let harness = start().await;
    let mut ws = connect(harness.addr).await;

    send(&mut ws, json!({"type": "ping"})).await;
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["time"].as_i64().unwrap() > 0);

    send(&mut ws, json!({"type": "bogus"})).await;
    assert_eq!(next_json(&mut ws).await["error"], "Unknown message type");

    send(&mut ws, json!({})).await;
    assert_eq!(next_json(&mut ws).await["error"], "Message type required");

    ws.send(Message::text("not json at all")).await.unwrap();
    assert_eq!(next_json(&mut ws).await["error"], "Invalid message format");

    send(&mut ws, json!({"type": "join_channel"})).await;
    assert_eq!(next_json(&mut ws).await["error"], "Channel required");

    join(&mut ws, "world-chat").await;
    let summaries = harness.state.hub.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].channels, vec!["world-chat".to_string()]);
}

#[tokio::test]
async fn chat_messages_reach_channel_members_only() {
    let harness = start().await;
    let mut alice = connect(harness.addr).await;
    let mut bob = connect(harness.addr).await;
    let mut carol = connect(harness.addr).await;

    join(&mut alice, "guild-7").await;
    join(&mut bob, "guild-7").await;
    join(&mut carol, "trade").await;

    let chat = json!({"type": "chat_message", "channel": "guild-7", "text": "raid at 9"});
    send(&mut alice, chat.clone()).await;

    assert_eq!(next_json(&mut bob).await, chat);
    assert_eq!(next_json(&mut alice).await, chat);

    // Carol is only in "trade"; her next frame must be the pong, not the chat
    send(&mut carol, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut carol).await["type"], "pong");
}

#[tokio::test]
async fn disconnect_deregisters_connection() {
    let harness = start().await;
    let mut ws = connect(harness.addr).await;
    assert_eq!(harness.state.hub.connection_count().await, 1);

    ws.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while harness.state.hub.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn close_all_sends_close_frames() {
    let harness = start().await;
    let mut first = connect(harness.addr).await;
    let mut second = connect(harness.addr).await;

    assert_eq!(harness.state.hub.close_all().await, 2);
    assert_eq!(harness.state.hub.connection_count().await, 0);

    for ws in [&mut first, &mut second] {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));
    }
}
