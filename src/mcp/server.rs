//! Server lifecycle.
//!
//! 1. **Start**: bind the configured transport and begin accepting messages
//! 2. **Run**: serve until a termination signal, stdin EOF or a fault
//! 3. **Stop**: stop reading, let in-flight requests finish within the
//!    grace period, then abandon whatever is left
//!
//! A server that hit an unrecoverable fault stays in [`ServerState::Error`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::config::{Config, TransportMode};
use crate::error::{ConfigError, LifecycleError};
use crate::mcp::capabilities::{CapabilityNegotiator, ServerInfo};
use crate::mcp::connection::TransportKind;
use crate::mcp::engine::{EngineOptions, ProtocolEngine};
use crate::mcp::http;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::transport::StdioTransport;

/// Server state in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not serving; `start()` is allowed.
    Stopped,
    /// Binding the transport.
    Starting,
    /// Accepting messages.
    Running,
    /// An unrecoverable fault occurred.
    Error,
}

/// Where the server listens.
#[derive(Debug, Clone)]
enum Binding {
    Stdio,
    Network {
        host: String,
        port: u16,
        websocket: bool,
    },
}

impl Binding {
    fn transports(&self) -> Vec<TransportKind> {
        match self {
            Self::Stdio => vec![TransportKind::Stdio],
            Self::Network {
                websocket: true, ..
            } => vec![TransportKind::Http, TransportKind::WebSocket],
            Self::Network { .. } => vec![TransportKind::Http],
        }
    }
}

/// Why [`McpServer::run`] stopped waiting.
enum Shutdown {
    Signal(&'static str),
    SignalUnavailable(io::Error),
    TransportEnded(Result<io::Result<()>, JoinError>),
    Fault(String),
}

/// Owns the engine and the active transport.
pub struct McpServer {
    engine: Arc<ProtocolEngine>,
    binding: Binding,
    grace: Duration,
    state: ServerState,
    task: Option<JoinHandle<io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl McpServer {
    /// Creates a stopped server.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: &Config, registry: ToolRegistry) -> Result<Self, ConfigError> {
        config.validate()?;

        let binding = match config.transport.mode {
            TransportMode::Stdio => Binding::Stdio,
            TransportMode::Network => Binding::Network {
                host: config.transport.bind_host().to_string(),
                port: config.transport.port,
                websocket: config.transport.websocket,
            },
        };

        let registry = Arc::new(registry);
        let server_info = ServerInfo {
            name: config.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: config.server.description.clone(),
        };
        let negotiator = CapabilityNegotiator::new(
            Arc::clone(&registry),
            server_info,
            binding.transports(),
            config.authentication.clone(),
        );
        let engine = ProtocolEngine::new(registry, negotiator, EngineOptions::from(&config.engine));

        Ok(Self {
            engine: Arc::new(engine),
            binding,
            grace: config.engine.shutdown_grace(),
            state: ServerState::Stopped,
            task: None,
            local_addr: None,
        })
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// The protocol engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    /// Bound listener address while a network transport is running.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds the transport and starts accepting messages.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyRunning`] unless the server is
    /// stopped, or [`LifecycleError::Bind`] if the listener cannot bind (the
    /// server is then in [`ServerState::Error`]).
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state != ServerState::Stopped {
            return Err(LifecycleError::AlreadyRunning { state: self.state });
        }
        self.state = ServerState::Starting;
        self.engine.resume();

        let task = match &self.binding {
            Binding::Stdio => {
                let engine = Arc::clone(&self.engine);
                info!("serving on stdio");
                tokio::spawn(async move { StdioTransport::new().serve(engine).await })
            }
            Binding::Network {
                host,
                port,
                websocket,
            } => {
                let websocket = *websocket;
                let listener = match TcpListener::bind((host.as_str(), *port)).await {
                    Ok(listener) => listener,
                    Err(source) => {
                        let addr = if host.contains(':') {
                            format!("[{host}]:{port}")
                        } else {
                            format!("{host}:{port}")
                        };
                        self.state = ServerState::Error;
                        return Err(LifecycleError::Bind { addr, source });
                    }
                };
                self.local_addr = listener.local_addr().ok();
                info!(%host, addr = ?self.local_addr, websocket, "listening");

                let app = http::router(Arc::clone(&self.engine), websocket);
                let stopping = self.engine.stopping();
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move { stopping.fired().await })
                        .await
                })
            }
        };

        self.task = Some(task);
        self.state = ServerState::Running;
        Ok(())
    }

    /// Stops the server.
    ///
    /// New messages are refused at once; in-flight requests get the grace
    /// period to finish and are then cancelled. Calling this on a stopped
    /// server does nothing.
    pub async fn stop(&mut self) {
        if self.state == ServerState::Stopped {
            return;
        }
        info!(in_flight = self.engine.in_flight(), "stopping server");

        self.engine.begin_shutdown();
        let deadline = tokio::time::Instant::now() + self.grace;

        if tokio::time::timeout_at(deadline, self.engine.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.engine.in_flight(),
                grace_ms = self.grace.as_millis(),
                "grace period elapsed; abandoning in-flight requests"
            );
        }
        self.engine.abort_in_flight();

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "transport ended with an error"),
                Ok(Err(e)) => warn!(error = %e, "transport task failed"),
                Err(_) => {
                    warn!("transport did not stop within the grace period");
                    task.abort();
                }
            }
        }

        self.local_addr = None;
        if self.state != ServerState::Error {
            self.state = ServerState::Stopped;
        }
        info!(state = ?self.state, "server stopped");
    }

    /// Starts the server, serves until told to stop, then stops it.
    ///
    /// Returns once a termination signal arrives, stdin reaches EOF (stdio
    /// mode) or an unrecoverable fault occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if startup fails or the server stopped because of a
    /// fault.
    pub async fn run(&mut self) -> Result<(), LifecycleError> {
        self.start().await?;

        let mut faults = self.engine.faults();
        let reason = tokio::select! {
            signal = wait_for_signal() => match signal {
                Ok(name) => Shutdown::Signal(name),
                Err(e) => Shutdown::SignalUnavailable(e),
            },
            ended = transport_finished(&mut self.task) => Shutdown::TransportEnded(ended),
            fault = next_fault(&mut faults) => Shutdown::Fault(fault),
        };

        let outcome = match reason {
            Shutdown::Signal(name) => {
                info!(signal = name, "received termination signal, initiating graceful shutdown");
                Ok(())
            }
            Shutdown::SignalUnavailable(e) => Err(LifecycleError::Signal(e)),
            Shutdown::TransportEnded(ended) => {
                self.task = None;
                match ended {
                    Ok(Ok(())) => {
                        info!("transport closed, shutting down");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(LifecycleError::Fault(format!("transport failed: {e}"))),
                    Err(e) => Err(LifecycleError::Fault(format!("transport task failed: {e}"))),
                }
            }
            Shutdown::Fault(fault) => Err(LifecycleError::Fault(fault)),
        };

        if outcome.is_err() {
            self.state = ServerState::Error;
        }
        self.stop().await;
        outcome
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("state", &self.state)
            .field("binding", &self.binding)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

async fn transport_finished(
    task: &mut Option<JoinHandle<io::Result<()>>>,
) -> Result<io::Result<()>, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn next_fault(faults: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(fault) = faults.borrow_and_update().clone() {
            return fault;
        }
        if faults.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
