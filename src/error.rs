//! Error types for toolbridge-mcp.
//!
//! Errors fall into two groups. Per-request failures ([`DispatchError`],
//! [`ToolError`]) are always recovered at the request boundary and turned into
//! a JSON-RPC error response. Configuration, registry and lifecycle errors
//! happen outside any request and are reported to the embedding application.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mcp::server::ServerState;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised by the tool registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    #[error("tool already registered: {name}")]
    DuplicateTool {
        /// The conflicting tool name.
        name: String,
    },

    /// The name belongs to a built-in protocol method.
    #[error("tool name is reserved for a built-in method: {name}")]
    ReservedName {
        /// The refused tool name.
        name: String,
    },

    /// No tool with the requested name exists.
    #[error("tool not found: {name}")]
    ToolNotFound {
        /// The requested tool name.
        name: String,
    },
}

/// A failure reported by a tool handler.
///
/// The message is passed to the client verbatim in `error.data`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable failure description.
    pub message: String,
}

impl ToolError {
    /// Creates a new handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-request failures produced while handling a JSON-RPC message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The message was not valid JSON.
    #[error("parse error")]
    ParseError,

    /// The message was JSON but not a valid JSON-RPC request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The method or tool does not exist.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The parameters do not satisfy the declared schema.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The tool handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// The call exceeded its execution budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected failure inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ToolNotFound { name } => Self::MethodNotFound(name),
            RegistryError::DuplicateTool { .. } | RegistryError::ReservedName { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<ToolError> for DispatchError {
    fn from(err: ToolError) -> Self {
        Self::Handler(err.message)
    }
}

/// Errors raised by the server lifecycle.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// `start()` was called while the server was not stopped.
    #[error("server already running (state: {state:?})")]
    AlreadyRunning {
        /// State at the time of the call.
        state: ServerState,
    },

    /// The network transport could not bind its listener.
    #[error("failed to bind transport to {addr}")]
    Bind {
        /// `host:port` the listener tried to bind.
        addr: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handler")]
    Signal(#[source] std::io::Error),

    /// An unrecoverable fault outside any single request.
    #[error("unrecoverable fault: {0}")]
    Fault(String),
}
