//! Capability negotiation (`initialize`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;
use crate::mcp::connection::TransportKind;
use crate::mcp::protocol::MCP_PROTOCOL_VERSION;
use crate::mcp::registry::{ToolRegistry, ToolSummary};

/// Server information for initialisation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Short description of the server.
    pub description: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Option<Value>,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Every registered tool, in registration order.
    pub tools: Vec<ToolSummary>,
    /// Transports this instance exposes.
    pub transport: Vec<TransportKind>,
    /// Declared authentication schemes; none are enforced.
    pub authentication: Vec<String>,
    /// Messages are JSON.
    pub json: bool,
    /// Partial/streamed results are not produced.
    pub streaming: bool,
}

/// Result of the `initialize` method.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server speaks.
    pub protocol_version: &'static str,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: ServerInfo,
}

/// Builds `initialize` results from the live registry.
///
/// Stateless: every call reflects the registry at that moment.
#[derive(Debug, Clone)]
pub struct CapabilityNegotiator {
    registry: Arc<ToolRegistry>,
    server_info: ServerInfo,
    transports: Vec<TransportKind>,
    authentication: Vec<String>,
}

impl CapabilityNegotiator {
    /// Creates a negotiator.
    #[must_use]
    pub const fn new(
        registry: Arc<ToolRegistry>,
        server_info: ServerInfo,
        transports: Vec<TransportKind>,
        authentication: Vec<String>,
    ) -> Self {
        Self {
            registry,
            server_info,
            transports,
            authentication,
        }
    }

    /// Answers an `initialize` request.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidParams`] if `params` is present but is
    /// not an initialize parameter object.
    pub fn negotiate(&self, params: Option<&Value>) -> Result<InitializeResult, DispatchError> {
        let params: InitializeParams = match params {
            None => InitializeParams::default(),
            Some(p) => serde_json::from_value(p.clone()).map_err(|e| {
                DispatchError::InvalidParams(format!("invalid initialize params: {e}"))
            })?,
        };

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                client_version = client.version.as_deref().unwrap_or("unknown"),
                requested_version = params.protocol_version.as_deref().unwrap_or("unspecified"),
                "client initialising"
            );
        }

        Ok(InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION,
            capabilities: self.capabilities(),
            server_info: self.server_info.clone(),
        })
    }

    /// Current capability snapshot.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: self.registry.list(),
            transport: self.transports.clone(),
            authentication: self.authentication.clone(),
            json: true,
            streaming: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::mcp::registry::{handler_fn, Tool, ToolContext};
    use serde_json::json;

    async fn noop(_params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(Value::Null)
    }

    fn negotiator() -> CapabilityNegotiator {
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new("b_tool", "B", json!({}), handler_fn(noop)))
            .unwrap();
        registry
            .register(Tool::new("a_tool", "A", json!({}), handler_fn(noop)))
            .unwrap();
        CapabilityNegotiator::new(
            Arc::new(registry),
            ServerInfo::default(),
            vec![TransportKind::Http, TransportKind::WebSocket],
            Vec::new(),
        )
    }

    #[test]
    fn negotiate_without_params() {
        let result = serde_json::to_value(negotiator().negotiate(None).unwrap()).unwrap();
        let caps = &result["capabilities"];
        assert_eq!(caps["tools"][0]["name"], "b_tool");
        assert_eq!(caps["tools"][1]["name"], "a_tool");
        assert_eq!(caps["transport"], json!(["http", "websocket"]));
        assert_eq!(caps["authentication"], json!([]));
        assert_eq!(caps["json"], true);
        assert_eq!(caps["streaming"], false);
        assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
    }

    #[test]
    fn negotiate_with_client_info() {
        let params = json!({
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        });
        assert!(negotiator().negotiate(Some(&params)).is_ok());
    }

    #[test]
    fn negotiate_is_repeatable() {
        let negotiator = negotiator();
        let first = serde_json::to_value(negotiator.negotiate(None).unwrap()).unwrap();
        let second = serde_json::to_value(negotiator.negotiate(None).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_params_are_invalid() {
        let params = json!({ "clientInfo": "not an object" });
        let err = negotiator().negotiate(Some(&params)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams(_)));
    }
}
