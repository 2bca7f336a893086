//! Integration tests for the WebSocket transport.
//!
//! A real server is started on an ephemeral port and driven with a
//! `tokio-tungstenite` client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use toolbridge_mcp::config::{Config, TransportMode};
use toolbridge_mcp::error::ToolError;
use toolbridge_mcp::mcp::engine::ProtocolEngine;
use toolbridge_mcp::mcp::registry::{handler_fn, Tool, ToolContext, ToolRegistry};
use toolbridge_mcp::mcp::server::{McpServer, ServerState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Tool::new(
            "slow",
            "Sleeps for `ms` milliseconds",
            json!({
                "type": "object",
                "properties": { "ms": { "type": "integer" } },
                "required": ["ms"]
            }),
            handler_fn(|params: Value, _ctx: ToolContext| async move {
                let ms = params["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, ToolError>(json!({ "slept": ms }))
            }),
        ))
        .unwrap();
    registry
        .register(Tool::new(
            "stuck",
            "Never finishes unless cancelled",
            json!({}),
            handler_fn(|_params: Value, ctx: ToolContext| async move {
                ctx.cancelled().await;
                Err::<Value, _>(ToolError::new("cancelled"))
            }),
        ))
        .unwrap();
    registry
}

async fn start(grace_ms: u64) -> (McpServer, SocketAddr) {
    let mut config = Config::default();
    config.transport.mode = TransportMode::Network;
    config.transport.port = 0;
    config.transport.websocket = true;
    config.engine.shutdown_grace_ms = grace_ms;

    let mut server = McpServer::new(&config, registry()).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::text(text.to_string())).await.unwrap();
}

/// Next JSON reply, skipping control frames.
async fn recv(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("a frame within the deadline")
            .expect("socket still open")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_for_in_flight(engine: &ProtocolEngine, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.in_flight() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("in-flight count settles");
}

#[tokio::test]
async fn test_text_and_binary_frames() {
    let (mut server, addr) = start(1000).await;
    let mut client = connect(addr).await;

    send(&mut client, r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(
        reply["result"]["capabilities"]["transport"],
        json!(["http", "websocket"])
    );

    client
        .send(Message::binary(
            br#"{"jsonrpc":"2.0","id":"b","method":"ping"}"#.to_vec(),
        ))
        .await
        .unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["id"], "b");
    assert_eq!(reply["result"], json!({}));

    server.stop().await;
}

#[tokio::test]
async fn test_bad_frames_do_not_end_session() {
    let (mut server, addr) = start(1000).await;
    let mut client = connect(addr).await;

    client
        .send(Message::binary(vec![0xff, 0xfe, 0xfd]))
        .await
        .unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    send(&mut client, "{\"jsonrpc\":").await;
    assert_eq!(recv(&mut client).await["error"]["code"], -32700);

    send(&mut client, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
    assert_eq!(recv(&mut client).await["id"], 2);

    server.stop().await;
}

#[tokio::test]
async fn test_responses_follow_completion_order() {
    let (mut server, addr) = start(1000).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        r#"{"jsonrpc":"2.0","id":"first","method":"slow","params":{"ms":300}}"#,
    )
    .await;
    send(
        &mut client,
        r#"{"jsonrpc":"2.0","id":"second","method":"slow","params":{"ms":1}}"#,
    )
    .await;

    assert_eq!(recv(&mut client).await["id"], "second");
    let reply = recv(&mut client).await;
    assert_eq!(reply["id"], "first");
    assert_eq!(reply["result"]["slept"], 300);

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_handlers() {
    let (mut server, addr) = start(1000).await;
    let engine = Arc::clone(server.engine());
    let mut client = connect(addr).await;

    send(&mut client, r#"{"jsonrpc":"2.0","id":1,"method":"stuck"}"#).await;
    wait_for_in_flight(&engine, 1).await;

    client.close(None).await.unwrap();
    drop(client);
    wait_for_in_flight(&engine, 0).await;

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_work() {
    let (mut server, addr) = start(2000).await;
    let engine = Arc::clone(server.engine());
    let mut client = connect(addr).await;

    send(
        &mut client,
        r#"{"jsonrpc":"2.0","id":"s","method":"slow","params":{"ms":200}}"#,
    )
    .await;
    wait_for_in_flight(&engine, 1).await;

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);

    let reply = recv(&mut client).await;
    assert_eq!(reply["id"], "s");
    assert_eq!(reply["result"]["slept"], 200);

    // The server side is gone once the work has drained.
    let rest = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("socket ends after shutdown");
    assert!(matches!(rest, None | Some(Ok(Message::Close(_)) | Err(_))));
}
