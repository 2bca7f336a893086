//! Model Context Protocol (MCP) server implementation.
//!
//! JSON-RPC 2.0 messages arrive on a transport, pass through the protocol
//! engine and are routed to registered tools. Each message is handled on
//! its own task; responses are correlated by request id.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          McpServer                           │
//! │                         (lifecycle)                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌──────────────┐    ┌──────────────┐    │
//! │   │  Transport  │───▶│    Engine    │───▶│ ToolRegistry │    │
//! │   │ stdio/http/ │    │ parse, route │    │  (handlers)  │    │
//! │   │  websocket  │◀───│   validate   │    └──────────────┘    │
//! │   └─────────────┘    └──────────────┘                        │
//! │          │                  │                                │
//! │          ▼                  ▼                                │
//! │   ┌─────────────────────────────────────────────────┐        │
//! │   │     Connection (id correlation, write lock)     │        │
//! │   └─────────────────────────────────────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod capabilities;
pub mod connection;
pub mod engine;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod signal;
pub mod transport;

pub use capabilities::{CapabilityNegotiator, ServerInfo};
pub use connection::{Connection, MessageSink, TransportKind};
pub use engine::{EngineOptions, ProtocolEngine};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use registry::{handler_fn, Tool, ToolContext, ToolHandler, ToolRegistry};
pub use server::{McpServer, ServerState};
pub use transport::StdioTransport;
