//! Per-session correlation and write serialisation.
//!
//! A [`Connection`] lives as long as one transport session. It tracks the
//! request ids currently being served, so that each id is answered at most
//! once, and owns the outbound [`MessageSink`] behind a lock so that
//! concurrently completing handlers never interleave their frames.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use crate::mcp::protocol::{OutgoingNotification, RequestId};
use crate::mcp::signal::{Signal, Trigger};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The transports a connection can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Standard input/output.
    Stdio,
    /// One HTTP request per message.
    Http,
    /// One WebSocket per connection.
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::WebSocket => "websocket",
        })
    }
}

/// Outbound half of a transport session.
///
/// Each call delivers one complete serialised message.
#[async_trait]
pub trait MessageSink: Send {
    /// Writes one message.
    async fn send(&mut self, message: String) -> io::Result<()>;
}

/// One transport session.
pub struct Connection {
    id: u64,
    kind: TransportKind,
    writer: Option<tokio::sync::Mutex<Box<dyn MessageSink>>>,
    in_flight: Mutex<HashMap<RequestId, Trigger>>,
    initialized: AtomicBool,
    closed: Trigger,
}

impl Connection {
    /// Opens a connection that writes to `sink`.
    #[must_use]
    pub fn new(kind: TransportKind, sink: Box<dyn MessageSink>) -> Arc<Self> {
        Self::build(kind, Some(tokio::sync::Mutex::new(sink)))
    }

    /// Opens a connection with no outbound stream.
    ///
    /// Used by request/reply transports where the reply travels back on the
    /// call itself; server-initiated messages are not possible.
    #[must_use]
    pub fn ephemeral(kind: TransportKind) -> Arc<Self> {
        Self::build(kind, None)
    }

    fn build(
        kind: TransportKind,
        writer: Option<tokio::sync::Mutex<Box<dyn MessageSink>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            writer,
            in_flight: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            closed: Trigger::new(),
        })
    }

    /// Process-unique connection number, for logging.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The transport this connection belongs to.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Writes one message, serialised against all other writers.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected` on ephemeral or closed connections, or with
    /// the sink's own IO error.
    pub async fn send(&self, message: String) -> io::Result<()> {
        let Some(writer) = &self.writer else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection has no outbound stream",
            ));
        };
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            ));
        }
        writer.lock().await.send(message).await
    }

    /// Sends a server-initiated notification.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`], plus serialisation failures.
    pub async fn notify(&self, notification: &OutgoingNotification) -> io::Result<()> {
        let json = serde_json::to_string(notification)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send(json).await
    }

    /// Starts tracking a request id.
    ///
    /// Returns the request's cancellation signal, or `None` if the id is
    /// already in flight or the connection is closed.
    pub fn begin_request(&self, id: &RequestId) -> Option<Signal> {
        if self.is_closed() {
            return None;
        }
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(id) {
            return None;
        }
        let trigger = Trigger::new();
        let signal = trigger.signal();
        in_flight.insert(id.clone(), trigger);
        Some(signal)
    }

    /// Stops tracking a request id.
    ///
    /// Returns `true` if the id was still tracked, meaning this caller owns
    /// the right to emit its single response.
    pub fn finish_request(&self, id: &RequestId) -> bool {
        self.lock_in_flight().remove(id).is_some()
    }

    /// Signals cancellation to one in-flight request.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        match self.lock_in_flight().get(id) {
            Some(trigger) => {
                trigger.fire();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Records a successful `initialize`.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Whether `initialize` has succeeded on this connection.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Closes the connection and cancels everything still in flight.
    ///
    /// Cancelled requests never produce a response.
    pub fn close(&self) {
        self.closed.fire();
        let cancelled: Vec<_> = self.lock_in_flight().drain().collect();
        for (id, trigger) in &cancelled {
            tracing::debug!(connection = self.id, id = %id, "cancelling in-flight request");
            trigger.fire();
        }
    }

    /// Whether [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    /// Fires when the connection closes.
    #[must_use]
    pub fn closed(&self) -> Signal {
        self.closed.signal()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<RequestId, Trigger>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
