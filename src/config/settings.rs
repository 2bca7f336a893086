//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity reported during capability negotiation.
    #[serde(default)]
    pub server: ServerSection,

    /// Transport selection and binding.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Protocol engine options.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Declared (unenforced) authentication scheme identifiers.
    #[serde(default)]
    pub authentication: Vec<String>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server.name must not be empty".to_string(),
            });
        }
        if self.engine.call_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "engine.call_timeout_ms must be positive".to_string(),
            });
        }
        if self.engine.shutdown_grace_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "engine.shutdown_grace_ms must be positive".to_string(),
            });
        }
        if self.transport.mode == TransportMode::Network {
            self.transport.check_host()?;
        }
        Ok(())
    }
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Description reported in `serverInfo`.
    #[serde(default = "default_server_description")]
    pub description: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            description: default_server_description(),
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_server_description() -> String {
    env!("CARGO_PKG_DESCRIPTION").to_string()
}

/// Which transport family the server exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON over standard input/output.
    #[default]
    Stdio,
    /// HTTP (and optionally WebSocket) on a TCP listener.
    Network,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport mode.
    #[serde(default)]
    pub mode: TransportMode,

    /// Listen host for network mode.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port for network mode (0 picks an ephemeral port).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expose the WebSocket endpoint alongside HTTP.
    #[serde(default = "default_true")]
    pub websocket: bool,
}

impl TransportConfig {
    /// Listen host with any IPv6 brackets removed.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        let host = self.host.trim();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Checks that the host is an IP address or a DNS name.
    ///
    /// Names are resolved when the listener binds.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the host is neither.
    pub fn check_host(&self) -> Result<(), ConfigError> {
        let host = self.bind_host();
        if host.parse::<IpAddr>().is_ok() || is_dns_name(host) {
            Ok(())
        } else {
            Err(ConfigError::ValidationError {
                message: format!("invalid listen host '{}'", self.host),
            })
        }
    }
}

fn is_dns_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            host: default_host(),
            port: default_port(),
            websocket: default_true(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

/// Protocol engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Reject tool invocations on a connection until `initialize` succeeded.
    #[serde(default)]
    pub require_initialize_first: bool,

    /// Per-call execution budget in milliseconds (unbounded when absent).
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// How long `stop()` waits for in-flight calls before cancelling them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl EngineConfig {
    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_initialize_first: false,
            call_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

const fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
