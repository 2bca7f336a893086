//! Protocol engine.
//!
//! Each framed message goes through parse, classification and dispatch to
//! completion independently of every other message. Handlers run
//! concurrently; only the final write is serialised, by the [`Connection`].
//!
//! The engine also keeps the process-wide in-flight counter and the
//! stopping/aborted signals the server lifecycle drives during shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::DispatchError;
use crate::mcp::capabilities::CapabilityNegotiator;
use crate::mcp::connection::{Connection, TransportKind};
use crate::mcp::protocol::{
    parse_message, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
use crate::mcp::registry::{ToolContext, ToolRegistry};
use crate::mcp::schema;
use crate::mcp::signal::{Signal, Trigger};

/// Capability negotiation.
pub const INITIALIZE: &str = "initialize";
/// Liveness check.
pub const PING: &str = "ping";
/// Tool listing.
pub const TOOLS_LIST: &str = "tools/list";
/// Tool invocation carrying `{name, arguments}`.
pub const TOOLS_CALL: &str = "tools/call";
/// Alias of [`TOOLS_CALL`].
pub const EXECUTE: &str = "execute";
/// Client finished initialising.
pub const NOTIFY_INITIALIZED: &str = "notifications/initialized";
/// Client abandons an in-flight request.
pub const NOTIFY_CANCELLED: &str = "notifications/cancelled";

/// Engine behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Refuse tool calls on a connection until `initialize` succeeded.
    pub require_initialize_first: bool,
    /// Execution budget per tool call.
    pub call_timeout: Option<Duration>,
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            require_initialize_first: config.require_initialize_first,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Parameters of `tools/call` / `execute`.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Counts one unit of in-flight work for as long as it lives.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Signals a handler's cancellation token however its caller exits.
struct CancelOnDrop(Trigger);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.fire();
    }
}

/// Parses, classifies and dispatches JSON-RPC messages.
pub struct ProtocolEngine {
    registry: Arc<ToolRegistry>,
    negotiator: CapabilityNegotiator,
    options: EngineOptions,
    in_flight: Arc<watch::Sender<usize>>,
    stopping: Trigger,
    aborted: Trigger,
    fault: watch::Sender<Option<String>>,
}

impl ProtocolEngine {
    /// Creates an engine over a populated registry.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        negotiator: CapabilityNegotiator,
        options: EngineOptions,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        let (fault, _) = watch::channel(None);
        Self {
            registry,
            negotiator,
            options,
            in_flight: Arc::new(in_flight),
            stopping: Trigger::new(),
            aborted: Trigger::new(),
            fault,
        }
    }

    /// The tool registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The active options.
    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Handles one framed message to completion.
    ///
    /// Returns the serialised response, or `None` when nothing must be sent
    /// (notifications, stray responses, cancelled or duplicate requests).
    pub async fn handle_message(&self, conn: &Arc<Connection>, raw: &str) -> Option<String> {
        let _guard = InFlight::enter(&self.in_flight);

        match parse_message(raw) {
            Err(err) => {
                warn!(
                    connection = conn.id(),
                    code = err.error.code,
                    "rejected malformed message"
                );
                encode_error(&err)
            }
            Ok(IncomingMessage::Response { id }) => {
                debug!(connection = conn.id(), id = ?id, "dropping unexpected response object");
                None
            }
            Ok(IncomingMessage::Notification(notif)) => {
                self.handle_notification(conn, notif).await;
                None
            }
            Ok(IncomingMessage::Request(req)) => self.handle_request(conn, req).await,
        }
    }

    /// Handles a message on its own task and writes any response to `conn`.
    ///
    /// The caller's read loop is never blocked by a slow handler.
    pub fn spawn_message(self: &Arc<Self>, conn: Arc<Connection>, raw: String) {
        let guard = InFlight::enter(&self.in_flight);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let Some(reply) = engine.handle_message(&conn, &raw).await else {
                return;
            };
            if let Err(e) = conn.send(reply).await {
                if conn.kind() == TransportKind::Stdio && !conn.is_closed() {
                    engine.report_fault(format!("failed to write to stdout: {e}"));
                } else {
                    debug!(connection = conn.id(), error = %e, "peer gone; closing connection");
                    conn.close();
                }
            }
        });
    }

    async fn handle_request(&self, conn: &Arc<Connection>, req: JsonRpcRequest) -> Option<String> {
        let id = req.id.clone();
        let Some(cancel) = conn.begin_request(&id) else {
            warn!(
                connection = conn.id(),
                id = %id,
                method = %req.method,
                "request id already in flight or connection closed; dropping"
            );
            return None;
        };

        let started = Instant::now();
        let outcome = self.run_request(conn, &req, cancel.clone()).await;

        if !conn.finish_request(&id) {
            debug!(connection = conn.id(), id = %id, "connection closed; response suppressed");
            return None;
        }
        // A cancelled request is never answered, even if its handler raced
        // to completion.
        let outcome = match outcome {
            Some(outcome) if !cancel.is_fired() => outcome,
            _ => {
                info!(connection = conn.id(), id = %id, method = %req.method, "request cancelled");
                return None;
            }
        };

        let duration_ms = started.elapsed().as_millis();
        match outcome {
            Ok(result) => {
                info!(
                    connection = conn.id(),
                    id = %id,
                    method = %req.method,
                    duration_ms,
                    outcome = "success",
                    "request completed"
                );
                encode_result(id, result)
            }
            Err(err) => {
                if let DispatchError::Internal(detail) = &err {
                    error!(connection = conn.id(), id = %id, method = %req.method, detail = %detail, "internal error");
                } else {
                    info!(
                        connection = conn.id(),
                        id = %id,
                        method = %req.method,
                        duration_ms,
                        outcome = "failure",
                        error = %err,
                        "request completed"
                    );
                }
                encode_error(&JsonRpcError::from_dispatch(Some(id), err))
            }
        }
    }

    /// Runs a request until it completes or is cancelled (`None`).
    async fn run_request(
        &self,
        conn: &Arc<Connection>,
        req: &JsonRpcRequest,
        cancel: Signal,
    ) -> Option<Result<Value, DispatchError>> {
        let closed = conn.closed();
        let aborted = self.aborted.signal();

        tokio::select! {
            biased;
            outcome = self.dispatch(conn, Some(&req.id), &req.method, req.params.clone(), cancel.clone()) => Some(outcome),
            () = cancel.fired() => None,
            () = closed.fired() => None,
            () = aborted.fired() => {
                conn.cancel_request(&req.id);
                None
            }
        }
    }

    async fn handle_notification(&self, conn: &Arc<Connection>, notif: JsonRpcNotification) {
        match notif.method.as_str() {
            NOTIFY_INITIALIZED => {
                debug!(connection = conn.id(), "client reported initialised");
            }
            NOTIFY_CANCELLED => {
                let id = notif
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());
                match id {
                    Some(id) => {
                        let found = conn.cancel_request(&id);
                        info!(connection = conn.id(), id = %id, found, "client cancelled request");
                    }
                    None => warn!(connection = conn.id(), "cancellation without a usable requestId"),
                }
            }
            method => {
                let trigger = Trigger::new();
                let closed = conn.closed();
                let aborted = self.aborted.signal();
                let outcome = tokio::select! {
                    biased;
                    outcome = self.dispatch(conn, None, method, notif.params, trigger.signal()) => Some(outcome),
                    () = closed.fired() => None,
                    () = aborted.fired() => None,
                };
                trigger.fire();

                match outcome {
                    Some(Ok(_)) => debug!(connection = conn.id(), method, "notification handled"),
                    Some(Err(DispatchError::MethodNotFound(_))) => {
                        debug!(connection = conn.id(), method, "ignoring unknown notification");
                    }
                    Some(Err(err)) => {
                        warn!(connection = conn.id(), method, error = %err, "notification handling failed");
                    }
                    None => debug!(connection = conn.id(), method, "notification cancelled"),
                }
            }
        }
    }

    /// Routes a method to the negotiator or a tool.
    async fn dispatch(
        &self,
        conn: &Arc<Connection>,
        id: Option<&RequestId>,
        method: &str,
        params: Option<Value>,
        cancel: Signal,
    ) -> Result<Value, DispatchError> {
        match method {
            INITIALIZE => {
                let result = self.negotiator.negotiate(params.as_ref())?;
                conn.mark_initialized();
                serde_json::to_value(result).map_err(|e| DispatchError::Internal(e.to_string()))
            }
            PING => Ok(json!({})),
            TOOLS_LIST => Ok(json!({ "tools": self.registry.list() })),
            TOOLS_CALL | EXECUTE => {
                let call: ToolCallParams = params
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| DispatchError::InvalidParams(format!("invalid tool call params: {e}")))?
                    .ok_or_else(|| DispatchError::InvalidParams("missing tool call params".to_string()))?;
                let arguments = call.arguments.filter(|a| !a.is_null()).unwrap_or_else(|| json!({}));
                self.invoke_tool(conn, id, &call.name, arguments, cancel).await
            }
            name if self.registry.contains(name) => {
                let arguments = params.unwrap_or_else(|| json!({}));
                self.invoke_tool(conn, id, name, arguments, cancel).await
            }
            other => Err(DispatchError::MethodNotFound(other.to_string())),
        }
    }

    /// Validates arguments and runs the tool on its own task.
    ///
    /// The handler task is detached if the call is cancelled, times out or
    /// is abandoned; in every case it sees the cancellation through its
    /// [`ToolContext`].
    async fn invoke_tool(
        &self,
        conn: &Arc<Connection>,
        id: Option<&RequestId>,
        name: &str,
        arguments: Value,
        cancel: Signal,
    ) -> Result<Value, DispatchError> {
        if self.options.require_initialize_first && !conn.is_initialized() {
            return Err(DispatchError::InvalidRequest(
                "Server not initialised".to_string(),
            ));
        }

        let tool = self.registry.lookup(name)?;
        schema::validate(tool.input_schema(), &arguments)
            .map_err(|violations| DispatchError::InvalidParams(schema::describe(&violations)))?;

        let handler = tool.handler();
        let peer = (conn.kind() != TransportKind::Http).then(|| Arc::clone(conn));
        let handler_cancel = CancelOnDrop(Trigger::new());
        let ctx = ToolContext::new(id.cloned(), handler_cancel.0.signal(), peer);
        let mut task = tokio::spawn(async move { handler.invoke(arguments, ctx).await });

        let budget = self.options.call_timeout;
        let deadline = async {
            match budget {
                Some(budget) => tokio::time::sleep(budget).await,
                None => std::future::pending().await,
            }
        };

        let joined = tokio::select! {
            joined = &mut task => joined,
            () = cancel.fired() => {
                return Err(DispatchError::Internal("request cancelled".to_string()));
            }
            () = deadline => {
                let budget = budget.unwrap_or_default();
                warn!(connection = conn.id(), tool = name, budget_ms = budget.as_millis(), "tool call timed out");
                return Err(DispatchError::Timeout(budget));
            }
        };

        match joined {
            Ok(result) => result.map_err(DispatchError::from),
            Err(e) if e.is_panic() => Err(DispatchError::Internal(format!("tool '{name}' panicked"))),
            Err(e) => Err(DispatchError::Internal(e.to_string())),
        }
    }

    /// Stops transports from reading new messages.
    pub fn begin_shutdown(&self) {
        self.stopping.fire();
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.is_fired()
    }

    /// Fires when shutdown begins.
    #[must_use]
    pub fn stopping(&self) -> Signal {
        self.stopping.signal()
    }

    /// Cancels every in-flight request on every connection.
    pub fn abort_in_flight(&self) {
        self.aborted.fire();
    }

    /// Fires when in-flight work is aborted.
    #[must_use]
    pub fn aborted(&self) -> Signal {
        self.aborted.signal()
    }

    /// Re-arms the engine after a stop.
    pub fn resume(&self) {
        self.stopping.reset();
        self.aborted.reset();
        self.fault.send_replace(None);
    }

    /// Messages currently being processed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Completes when no message is being processed.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Records an unrecoverable fault for the lifecycle to act on.
    pub fn report_fault(&self, message: String) {
        error!(fault = %message, "unrecoverable fault");
        self.fault.send_replace(Some(message));
    }

    /// Observes reported faults.
    #[must_use]
    pub fn faults(&self) -> watch::Receiver<Option<String>> {
        self.fault.subscribe()
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("tools", &self.registry.len())
            .field("options", &self.options)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

fn encode_result(id: RequestId, result: Value) -> Option<String> {
    match serde_json::to_string(&JsonRpcResponse::success(id.clone(), result)) {
        Ok(json) => Some(json),
        Err(e) => {
            error!(id = %id, error = %e, "failed to serialise result");
            encode_error(&JsonRpcError::from_dispatch(
                Some(id),
                DispatchError::Internal(e.to_string()),
            ))
        }
    }
}

fn encode_error(err: &JsonRpcError) -> Option<String> {
    serde_json::to_string(err)
        .map_err(|e| error!(error = %e, "failed to serialise error response"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::mcp::capabilities::ServerInfo;
    use crate::mcp::registry::{handler_fn, Tool};

    async fn greet(params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let name = params["name"].as_str().unwrap_or_default();
        Ok(json!({ "greeting": format!("hello {name}") }))
    }

    async fn fail(_params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::new("backend unavailable"))
    }

    async fn hang(_params: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        ctx.cancelled().await;
        Err(ToolError::new("cancelled"))
    }

    async fn explode(_params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        panic!("boom")
    }

    fn engine_with(options: EngineOptions) -> Arc<ProtocolEngine> {
        let mut registry = ToolRegistry::new();
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        });
        registry
            .register(Tool::new("greet", "Greets", schema, handler_fn(greet)))
            .unwrap();
        registry
            .register(Tool::new("fail", "Fails", json!({}), handler_fn(fail)))
            .unwrap();
        registry
            .register(Tool::new("hang", "Hangs", json!({}), handler_fn(hang)))
            .unwrap();
        registry
            .register(Tool::new("explode", "Panics", json!({}), handler_fn(explode)))
            .unwrap();
        let registry = Arc::new(registry);
        let negotiator = CapabilityNegotiator::new(
            Arc::clone(&registry),
            ServerInfo::default(),
            vec![TransportKind::Http],
            Vec::new(),
        );
        Arc::new(ProtocolEngine::new(registry, negotiator, options))
    }

    fn engine() -> Arc<ProtocolEngine> {
        engine_with(EngineOptions::default())
    }

    async fn call(engine: &ProtocolEngine, conn: &Arc<Connection>, raw: &str) -> Value {
        let reply = engine.handle_message(conn, raw).await.expect("a response");
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn ping_echoes_id() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine(), &conn, r#"{"jsonrpc":"2.0","id":"p-1","method":"ping"}"#).await;
        assert_eq!(reply["id"], "p-1");
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_call_and_direct_method_forms() {
        let engine = engine();
        let conn = Connection::ephemeral(TransportKind::Http);

        let reply = call(
            &engine,
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"greet","arguments":{"name":"ada"}}}"#,
        )
        .await;
        assert_eq!(reply["result"]["greeting"], "hello ada");

        let reply = call(
            &engine,
            &conn,
            r#"{"jsonrpc":"2.0","id":2,"method":"greet","params":{"name":"bob"}}"#,
        )
        .await;
        assert_eq!(reply["result"]["greeting"], "hello bob");

        let reply = call(
            &engine,
            &conn,
            r#"{"jsonrpc":"2.0","id":3,"method":"execute","params":{"name":"greet","arguments":{"name":"cy"}}}"#,
        )
        .await;
        assert_eq!(reply["result"]["greeting"], "hello cy");
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(
            &engine(),
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["id"], 1);
    }

    #[tokio::test]
    async fn missing_required_field_is_invalid_params() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(
            &engine(),
            &conn,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"greet","arguments":{}}}"#,
        )
        .await;
        assert_eq!(reply["error"]["code"], -32602);
        assert!(reply["error"]["data"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn missing_tool_call_params_is_invalid_params() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine(), &conn, r#"{"jsonrpc":"2.0","id":1,"method":"tools/call"}"#).await;
        assert_eq!(reply["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn handler_failure_is_application_error() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine(), &conn, r#"{"jsonrpc":"2.0","id":9,"method":"fail"}"#).await;
        assert_eq!(reply["error"]["code"], -32000);
        assert_eq!(reply["error"]["data"], "backend unavailable");
    }

    #[tokio::test]
    async fn handler_panic_is_internal_error() {
        let engine = engine();
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":4,"method":"explode"}"#).await;
        assert_eq!(reply["error"]["code"], -32603);

        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#).await;
        assert_eq!(reply["id"], 5);
    }

    #[tokio::test]
    async fn timeout_yields_timeout_error() {
        let engine = engine_with(EngineOptions {
            require_initialize_first: false,
            call_timeout: Some(Duration::from_millis(20)),
        });
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":1,"method":"hang"}"#).await;
        assert_eq!(reply["error"]["code"], -32001);
        assert_eq!(reply["error"]["data"]["timeoutMs"], 20);
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn initialize_gate_when_required() {
        let engine = engine_with(EngineOptions {
            require_initialize_first: true,
            call_timeout: None,
        });
        let conn = Connection::ephemeral(TransportKind::Http);

        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":1,"method":"greet","params":{"name":"x"}}"#).await;
        assert_eq!(reply["error"]["code"], -32600);

        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#).await;
        assert!(reply["result"]["capabilities"].is_object());

        let reply = call(&engine, &conn, r#"{"jsonrpc":"2.0","id":3,"method":"greet","params":{"name":"x"}}"#).await;
        assert_eq!(reply["result"]["greeting"], "hello x");
    }

    #[tokio::test]
    async fn tool_calls_allowed_before_initialize_by_default() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine(), &conn, r#"{"jsonrpc":"2.0","id":1,"method":"greet","params":{"name":"x"}}"#).await;
        assert_eq!(reply["result"]["greeting"], "hello x");
    }

    #[tokio::test]
    async fn notifications_and_responses_produce_nothing() {
        let engine = engine();
        let conn = Connection::ephemeral(TransportKind::Http);
        for raw in [
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","method":"fail"}"#,
            r#"{"jsonrpc":"2.0","method":"no/such/method"}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
        ] {
            assert!(engine.handle_message(&conn, raw).await.is_none(), "{raw}");
        }
    }

    #[tokio::test]
    async fn malformed_input_is_parse_error() {
        let conn = Connection::ephemeral(TransportKind::Http);
        let reply = call(&engine(), &conn, "{\"jsonrpc\": ").await;
        assert_eq!(reply["error"]["code"], -32700);
        assert!(reply["id"].is_null());
    }

    #[tokio::test]
    async fn closing_connection_suppresses_response() {
        let engine = engine();
        let conn = Connection::ephemeral(TransportKind::WebSocket);
        let pending = {
            let engine = Arc::clone(&engine);
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                engine
                    .handle_message(&conn, r#"{"jsonrpc":"2.0","id":1,"method":"hang"}"#)
                    .await
            })
        };
        while conn.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        conn.close();
        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_cancels_and_counter_returns_to_zero() {
        let engine = engine();
        let conn = Connection::ephemeral(TransportKind::WebSocket);
        let pending = {
            let engine = Arc::clone(&engine);
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                engine
                    .handle_message(&conn, r#"{"jsonrpc":"2.0","id":1,"method":"hang"}"#)
                    .await
            })
        };
        while conn.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.in_flight(), 1);
        engine.abort_in_flight();
        assert!(pending.await.unwrap().is_none());
        tokio::time::timeout(Duration::from_secs(1), engine.wait_idle())
            .await
            .expect("engine drains");
    }

    #[test]
    fn resume_rearms_signals() {
        let engine = engine();
        engine.begin_shutdown();
        engine.abort_in_flight();
        engine.report_fault("stdout closed".to_string());
        assert!(engine.is_stopping());
        assert!(engine.faults().borrow().is_some());

        engine.resume();
        assert!(!engine.is_stopping());
        assert!(!engine.aborted().is_fired());
        assert!(engine.faults().borrow().is_none());
    }
}
