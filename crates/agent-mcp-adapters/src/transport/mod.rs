//! Byte/message channels to MCP servers
//!
//! A transport moves JSON-RPC messages and nothing more: request ids,
//! the handshake and response matching live in the session layer. Every
//! transport walks the same small state machine,
//! `Created -> Connected -> Closed`, and `close` is idempotent.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Result;
use crate::config::{ConnectionSpec, TransportKind};
use crate::error::MCPError;

pub mod in_process;
pub mod pipe;
pub mod stream;

pub use in_process::InProcessTransport;
pub use pipe::PipeTransport;
pub use stream::StreamTransport;

/// Lifecycle of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connected,
    Closed,
}

/// A message channel to one server
///
/// `receive` is meant for a single reader (the session's dispatch task);
/// `send` may be called concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel; only valid from `Created`
    async fn open(&self) -> Result<()>;

    /// Deliver one message to the server
    async fn send(&self, message: Value) -> Result<()>;

    /// Next message from the server, or `None` once the channel has ended
    async fn receive(&self) -> Option<Value>;

    /// Release the channel; calling it again is a no-op
    async fn close(&self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> TransportState;

    /// Which kind of transport this is
    fn kind(&self) -> TransportKind;
}

/// Type alias for Arc-wrapped transport
pub type ArcTransport = Arc<dyn Transport>;

/// Build the (unopened) transport a spec describes
///
/// For in-process specs the server side of the linked pair is started here,
/// so the returned endpoint behaves exactly like a remote one.
pub fn from_spec(spec: &ConnectionSpec) -> Result<ArcTransport> {
    spec.validate()?;

    let transport: ArcTransport = match spec {
        ConnectionSpec::Pipe(pipe) => Arc::new(PipeTransport::new(pipe.clone())),
        ConnectionSpec::Stream(stream) => Arc::new(StreamTransport::new(stream.clone())?),
        ConnectionSpec::InProcess(in_process) => {
            let server = in_process.server.clone().ok_or_else(|| {
                MCPError::Configuration("in-process transport requires a server handle".to_string())
            })?;
            let (client_end, server_end) = InProcessTransport::pair();
            crate::server::serve(server, server_end);
            Arc::new(client_end)
        }
    };

    Ok(transport)
}

#[derive(Debug)]
struct StateInner {
    state: TransportState,
    /// An `open` is in flight; only meaningful while `Created`
    opening: bool,
}

/// Shared state-machine bookkeeping for transport implementations
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<StateInner>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(StateInner {
            state: TransportState::Created,
            opening: false,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> TransportState {
        self.lock().state
    }

    /// Claim the right to open; only one attempt may be in flight
    ///
    /// Dropping the returned attempt without finishing it (a failed or
    /// cancelled open) lets a later `open` try again.
    pub(crate) fn begin_open(&self) -> Result<OpenAttempt<'_>> {
        let mut inner = self.lock();
        match inner.state {
            TransportState::Created if inner.opening => Err(MCPError::Connection(
                "transport is already being opened".to_string(),
            )),
            TransportState::Created => {
                inner.opening = true;
                Ok(OpenAttempt { cell: self })
            }
            TransportState::Connected => Err(MCPError::Connection(
                "transport is already open".to_string(),
            )),
            TransportState::Closed => Err(MCPError::TransportClosed),
        }
    }

    /// Move to `Closed`; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        let mut inner = self.lock();
        let was_open = inner.state != TransportState::Closed;
        inner.state = TransportState::Closed;
        was_open
    }

    /// Error unless the transport can carry messages right now
    pub(crate) fn ensure_connected(&self) -> Result<()> {
        match self.get() {
            TransportState::Connected => Ok(()),
            TransportState::Created => Err(MCPError::NotConnected),
            TransportState::Closed => Err(MCPError::TransportClosed),
        }
    }
}

/// An `open` in progress, claimed through [`StateCell::begin_open`]
pub(crate) struct OpenAttempt<'a> {
    cell: &'a StateCell,
}

impl OpenAttempt<'_> {
    /// Finish a successful open; a close that raced the open wins
    pub(crate) fn finish(self) -> Result<()> {
        let mut inner = self.cell.lock();
        inner.opening = false;
        let outcome = match inner.state {
            TransportState::Closed => Err(MCPError::TransportClosed),
            _ => {
                inner.state = TransportState::Connected;
                Ok(())
            }
        };
        drop(inner);
        outcome
    }
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        self.cell.lock().opening = false;
    }
}
