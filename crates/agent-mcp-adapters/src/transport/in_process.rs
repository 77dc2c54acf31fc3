//! Linked in-process transport
//!
//! Two endpoints joined by a pair of unbounded channels: whatever one side
//! sends, the other receives. Closing either end drops its sender, which
//! ends the peer's `receive`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{StateCell, Transport, TransportState};
use crate::Result;
use crate::config::TransportKind;
use crate::error::MCPError;

/// One end of a linked in-memory channel pair
pub struct InProcessTransport {
    state: StateCell,
    outbound: StdMutex<Option<mpsc::UnboundedSender<Value>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl InProcessTransport {
    /// Create two endpoints wired to each other
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Value>, inbound: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            state: StateCell::new(),
            outbound: StdMutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn open(&self) -> Result<()> {
        self.state.begin_open()?.finish()
    }

    async fn send(&self, message: Value) -> Result<()> {
        self.state.ensure_connected()?;

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.as_ref().ok_or(MCPError::TransportClosed)?;
        tx.send(message).map_err(|_| MCPError::TransportClosed)
    }

    async fn receive(&self) -> Option<Value> {
        self.inbound.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        debug!("Closing in-process transport");
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }
}
