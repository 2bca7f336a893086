//! toolbridge-mcp: a JSON-RPC 2.0 tool server for language-model clients
//!
//! Exposes application-defined tools over stdio, HTTP or WebSocket using the
//! Model Context Protocol message shapes.
//!
//! # Architecture
//!
//! The server only moves messages. Tools are registered once at startup and
//! carry their own JSON Schema; the engine validates parameters against it,
//! runs the handler and sends back exactly one response per request id.
//!
//! - **Transports**: newline-delimited stdio, `POST /mcp`, `GET /ws`
//! - **Concurrency**: every message is handled on its own task
//! - **Shutdown**: in-flight requests get a grace period, then are cancelled
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: Protocol engine, transports and lifecycle
//! - [`tools`]: Bundled user-story tools

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
