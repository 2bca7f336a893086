//! HTTP and WebSocket transport.
//!
//! - `POST /mcp`: one JSON-RPC message per request body; the response body is
//!   the JSON-RPC response, or `204 No Content` when there is none
//! - `GET /ws`: one WebSocket per client; each text or binary frame carries
//!   one message and responses travel back as text frames
//! - `GET /health`: liveness probe

use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mcp::connection::{Connection, MessageSink, TransportKind};
use crate::mcp::engine::ProtocolEngine;
use crate::mcp::protocol::JsonRpcError;

/// Shared handler state.
#[derive(Clone)]
pub struct HttpState {
    engine: Arc<ProtocolEngine>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Builds the transport's router.
///
/// `/ws` is only routed when `websocket` is set.
pub fn router(engine: Arc<ProtocolEngine>, websocket: bool) -> Router {
    let mut router = Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/health", get(health));
    if websocket {
        router = router.route("/ws", get(ws_handler));
    }
    router
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(HttpState { engine })
}

async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = started_at.elapsed().as_millis(),
        "request summary"
    );

    response
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn shutting_down() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response()
}

fn json_response(json: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        json,
    )
        .into_response()
}

/// Closes a connection when the owning handler goes away.
struct CloseOnDrop(Arc<Connection>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn mcp_endpoint(State(state): State<HttpState>, body: Bytes) -> Response {
    if state.engine.is_stopping() {
        return shutting_down();
    }

    let Ok(raw) = std::str::from_utf8(&body) else {
        warn!("rejected non UTF-8 request body");
        return serde_json::to_string(&JsonRpcError::parse_error())
            .map_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response(), json_response);
    };

    // A dropped request (client gone) cancels whatever it started.
    let conn = CloseOnDrop(Connection::ephemeral(TransportKind::Http));
    match state.engine.handle_message(&conn.0, raw).await {
        Some(json) => json_response(json),
        None if state.engine.aborted().is_fired() => shutting_down(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpState>) -> Response {
    if state.engine.is_stopping() {
        return shutting_down();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

/// Outbound half of a WebSocket.
struct WebSocketSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, message: String) -> io::Result<()> {
        self.0
            .send(Message::Text(message.into()))
            .await
            .map_err(io::Error::other)
    }
}

async fn handle_socket(socket: WebSocket, engine: Arc<ProtocolEngine>) {
    let (sender, mut receiver) = socket.split();
    let conn = Connection::new(TransportKind::WebSocket, Box::new(WebSocketSink(sender)));
    let stopping = engine.stopping();
    info!(connection = conn.id(), "websocket client connected");

    let shutdown = loop {
        let frame = tokio::select! {
            biased;
            () = stopping.fired() => break true,
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                engine.spawn_message(Arc::clone(&conn), text.as_str().to_owned());
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => engine.spawn_message(Arc::clone(&conn), text),
                Err(_) => {
                    warn!(connection = conn.id(), "rejected non UTF-8 frame");
                    if let Ok(json) = serde_json::to_string(&JsonRpcError::parse_error()) {
                        if conn.send(json).await.is_err() {
                            break false;
                        }
                    }
                }
            },
            Some(Ok(Message::Close(_))) | None => break false,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(connection = conn.id(), error = %e, "websocket read failed");
                break false;
            }
        }
    };

    if shutdown {
        // Let accepted messages finish; the lifecycle aborts them after the
        // grace period.
        let aborted = engine.aborted();
        tokio::select! {
            () = engine.wait_idle() => {}
            () = aborted.fired() => {}
        }
    }

    conn.close();
    info!(connection = conn.id(), "websocket client disconnected");
}
