//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the core message types used in the Model Context Protocol.
//! All messages are JSON-RPC 2.0 objects carrying MCP method names.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id`)
//! - **Response**: A reply to a request (success or error)
//! - **Notification**: A one-way message (no `id`, no response expected)
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or numbers (never `null`)
//! - Request IDs must be unique within a session
//! - Batches are not supported

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::error::DispatchError;

/// The MCP protocol version this implementation supports.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// The only accepted value of the `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request ID.
///
/// IDs are strings or numbers, never `null`.
/// `1` and `"1"` are distinct IDs. Numbers are kept as received, so `1.5` or
/// an integer beyond `i64` is echoed unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(Number),
    /// String request ID.
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect exactly one response from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 notification message (incoming).
///
/// Notifications do not have an ID and never produce a response.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    pub params: Option<Value>,
}

/// An outgoing JSON-RPC 2.0 notification (server to client).
///
/// Used for sending progress updates and other notifications.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Creates a new outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Creates a progress notification.
    #[must_use]
    pub fn progress(
        progress_token: &RequestId,
        progress: u32,
        total: Option<u32>,
        message: Option<&str>,
    ) -> Self {
        let params = json!({
            "progressToken": progress_token,
            "progress": progress,
            "total": total,
            "message": message,
        });
        Self::new("notifications/progress", Some(params))
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// JSON-RPC 2.0 error codes used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// A tool handler reported a failure.
    ApplicationError,
    /// A call exceeded its execution budget.
    Timeout,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ApplicationError => -32000,
            Self::Timeout => -32001,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ApplicationError => "Tool execution failed",
            Self::Timeout => "Request timed out",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Maps the dispatch taxonomy onto wire error objects.
///
/// Internal details are logged by the engine, never sent to the client.
impl From<DispatchError> for JsonRpcErrorData {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::ParseError => Self::from_code(ErrorCode::ParseError),
            DispatchError::InvalidRequest(detail) => {
                Self::from_code(ErrorCode::InvalidRequest).with_data(Value::String(detail))
            }
            DispatchError::MethodNotFound(method) => Self::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
            DispatchError::InvalidParams(detail) => {
                Self::from_code(ErrorCode::InvalidParams).with_data(Value::String(detail))
            }
            DispatchError::Handler(message) => {
                Self::from_code(ErrorCode::ApplicationError).with_data(Value::String(message))
            }
            DispatchError::Timeout(budget) => Self::from_code(ErrorCode::Timeout)
                .with_data(json!({ "timeoutMs": u64::try_from(budget.as_millis()).unwrap_or(u64::MAX) })),
            DispatchError::Internal(_) => Self::from_code(ErrorCode::InternalError),
        }
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to (`null` if unknown).
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Creates an error response from a dispatch failure.
    #[must_use]
    pub fn from_dispatch(id: Option<RequestId>, err: DispatchError) -> Self {
        Self::new(id, err.into())
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_dispatch(None, DispatchError::ParseError)
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self::from_dispatch(id, DispatchError::InvalidRequest(detail.into()))
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::from_dispatch(Some(id), DispatchError::MethodNotFound(method.to_string()))
    }
}

/// A classified incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
    /// A response object; servers do not expect these and drop them.
    Response {
        /// ID of the response, if it carried a usable one.
        id: Option<RequestId>,
    },
}

impl IncomingMessage {
    /// Returns the method name of this message, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response { .. } => None,
        }
    }

    /// Returns the request ID if this is a request.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) | Self::Response { .. } => None,
        }
    }
}

/// Parses one framed message and classifies it.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the text is not JSON (`-32700`) or is JSON but
/// not a well-formed request or notification (`-32600`). The error carries the
/// request ID whenever one could be recovered.
pub fn parse_message(json: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;

    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(JsonRpcError::invalid_request(
                None,
                "batch requests are not supported",
            ))
        }
        _ => {
            return Err(JsonRpcError::invalid_request(
                None,
                "message must be a JSON object",
            ))
        }
    };

    let id = obj.get("id").and_then(RequestId::from_value);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(
            id,
            "jsonrpc field must be \"2.0\"",
        ));
    }

    let Some(method) = obj.get("method") else {
        if is_response_shaped(&obj) {
            return Ok(IncomingMessage::Response { id });
        }
        return Err(JsonRpcError::invalid_request(id, "missing method field"));
    };

    let method = match method.as_str() {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            return Err(JsonRpcError::invalid_request(
                id,
                "method field must be a non-empty string",
            ))
        }
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => None,
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
        Some(_) => {
            return Err(JsonRpcError::invalid_request(
                id,
                "params must be an object or an array",
            ))
        }
    };

    if obj.contains_key("id") {
        let Some(id) = id else {
            return Err(JsonRpcError::invalid_request(
                None,
                "id must be a string or a number",
            ));
        };
        Ok(IncomingMessage::Request(JsonRpcRequest { id, method, params }))
    } else {
        Ok(IncomingMessage::Notification(JsonRpcNotification {
            method,
            params,
        }))
    }
}

fn is_response_shaped(obj: &Map<String, Value>) -> bool {
    obj.contains_key("id") && (obj.contains_key("result") ^ obj.contains_key("error"))
}
