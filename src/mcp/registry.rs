//! Tool registry.
//!
//! Tools are registered once, before the transports start accepting
//! messages, and are never mutated afterwards. The registry is then shared
//! read-only behind an `Arc`, so lookups need no locking.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{RegistryError, ToolError};
use crate::mcp::connection::Connection;
use crate::mcp::engine::{
    EXECUTE, INITIALIZE, NOTIFY_CANCELLED, NOTIFY_INITIALIZED, PING, TOOLS_CALL, TOOLS_LIST,
};
use crate::mcp::protocol::{OutgoingNotification, RequestId};
use crate::mcp::signal::Signal;

/// Domain logic behind a tool.
///
/// Implemented by the embedding application; the engine never looks inside.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with schema-validated parameters.
    async fn invoke(&self, params: Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// Adapts an async function or closure into a [`ToolHandler`].
pub const fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

/// A [`ToolHandler`] backed by a function; see [`handler_fn`].
#[derive(Clone, Copy)]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn invoke(&self, params: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        (self.0)(params, ctx).await
    }
}

/// Per-invocation context handed to a [`ToolHandler`].
#[derive(Clone)]
pub struct ToolContext {
    request_id: Option<RequestId>,
    cancellation: Signal,
    peer: Option<Arc<Connection>>,
}

impl ToolContext {
    pub(crate) const fn new(
        request_id: Option<RequestId>,
        cancellation: Signal,
        peer: Option<Arc<Connection>>,
    ) -> Self {
        Self {
            request_id,
            cancellation,
            peer,
        }
    }

    /// ID of the request being served; `None` for notifications.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Whether the caller has given up on this invocation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_fired()
    }

    /// Completes when the invocation is cancelled.
    ///
    /// Long-running handlers should race their work against this.
    pub async fn cancelled(&self) {
        self.cancellation.fired().await;
    }

    /// Sends a server-initiated notification to the calling client.
    ///
    /// Returns `false` when the transport cannot carry notifications (HTTP)
    /// or the connection is gone.
    pub async fn notify(&self, notification: &OutgoingNotification) -> bool {
        let Some(peer) = &self.peer else {
            return false;
        };
        match peer.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, method = %notification.method, "notification not delivered");
                false
            }
        }
    }

    /// Reports progress for the current request.
    pub async fn progress(&self, progress: u32, total: Option<u32>, message: Option<&str>) -> bool {
        let Some(id) = &self.request_id else {
            return false;
        };
        self.notify(&OutgoingNotification::progress(id, progress, total, message))
            .await
    }
}

/// An immutable, registered tool.
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Creates a tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    /// Unique tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON Schema for the tool's parameters.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Shared handle to the handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Summary published during capability negotiation.
    #[must_use]
    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A tool as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Method names the engine answers itself.
const RESERVED_NAMES: [&str; 7] = [
    INITIALIZE,
    PING,
    TOOLS_LIST,
    TOOLS_CALL,
    EXECUTE,
    NOTIFY_INITIALIZED,
    NOTIFY_CANCELLED,
];

/// Registered tools, in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken; the
    /// existing registration is left untouched. Returns
    /// [`RegistryError::ReservedName`] for a built-in method name such as
    /// `ping` or `tools/call`.
    pub fn register(&mut self, tool: Tool) -> Result<(), RegistryError> {
        if RESERVED_NAMES.contains(&tool.name()) {
            return Err(RegistryError::ReservedName {
                name: tool.name().to_string(),
            });
        }
        if self.tools.contains_key(tool.name()) {
            return Err(RegistryError::DuplicateTool {
                name: tool.name().to_string(),
            });
        }
        tracing::debug!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        Ok(())
    }

    /// Looks up a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ToolNotFound`] if no such tool exists.
    pub fn lookup(&self, name: &str) -> Result<Arc<Tool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
            })
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Summaries of all tools in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools.values().map(|tool| tool.summary()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::signal::Trigger;
    use serde_json::json;

    async fn echo(params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(params)
    }

    fn tool(name: &str, description: &str) -> Tool {
        Tool::new(name, description, json!({ "type": "object" }), handler_fn(echo))
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_first() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("echo", "first")).unwrap();

        let err = registry.register(tool("echo", "second")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateTool {
                name: "echo".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("echo").unwrap().description(), "first");
    }

    #[test]
    fn built_in_method_names_are_refused() {
        let mut registry = ToolRegistry::new();
        for name in ["initialize", "ping", "tools/list", "tools/call", "execute"] {
            let err = registry.register(tool(name, "shadow")).unwrap_err();
            assert_eq!(
                err,
                RegistryError::ReservedName {
                    name: name.to_string()
                }
            );
        }
        assert!(registry.is_empty());
        registry.register(tool("ping_host", "not reserved")).unwrap();
    }

    #[test]
    fn lookup_missing_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(RegistryError::ToolNotFound { .. })
        ));
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(tool(name, name)).unwrap();
        }
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn summary_serialises_camel_case() {
        let value = serde_json::to_value(tool("echo", "Echo").summary()).unwrap();
        assert_eq!(value["name"], "echo");
        assert_eq!(value["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn function_handlers_receive_context() {
        let trigger = Trigger::new();
        let ctx = ToolContext::new(Some(RequestId::from(1)), trigger.signal(), None);
        let handler = tool("echo", "Echo").handler();
        let out = handler.invoke(json!({ "x": 1 }), ctx.clone()).await.unwrap();
        assert_eq!(out, json!({ "x": 1 }));

        assert!(!ctx.is_cancelled());
        trigger.fire();
        assert!(ctx.is_cancelled());
        assert!(!ctx.notify(&OutgoingNotification::new("noop", None)).await);
    }
}
