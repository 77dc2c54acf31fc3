//! JSON-RPC session over a transport
//!
//! A background reader task owns `receive`; callers register a oneshot slot
//! under their request id and wait on it, so any number of requests can be
//! in flight at once. When the transport ends, every outstanding request
//! fails with [`MCPError::TransportClosed`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::McpSession;
use crate::Result;
use crate::error::MCPError;
use crate::protocol::{
    self, Incoming, MCPPromptDefinition, MCPPromptResult, MCPResourceContent,
    MCPResourceDefinition, MCPServerInfo, MCPToolDefinition, MCPToolResult, RpcError, codes,
    methods,
};
use crate::transport::{ArcTransport, TransportState};

type Reply = std::result::Result<Value, RpcError>;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting requests and fail the ones still waiting
    fn shut(&self) {
        let mut pending = self.lock();
        pending.closed = true;
        pending.waiters.clear();
    }
}

/// Removes a request's slot when the caller stops waiting
struct PendingSlot<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.lock().waiters.remove(&self.id);
    }
}

/// MCP session speaking JSON-RPC 2.0 over any [`Transport`](crate::transport::Transport)
pub struct RpcSession {
    transport: ArcTransport,
    shared: Arc<Shared>,

    /// Server info from initialization
    server_info: OnceLock<MCPServerInfo>,

    /// Request ID counter
    next_id: AtomicU64,

    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcSession {
    /// Open `transport` if needed and run the initialize handshake
    pub async fn connect(transport: ArcTransport) -> Result<Self> {
        if transport.state() != TransportState::Connected {
            transport.open().await?;
        }

        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_loop(transport.clone(), shared.clone()));

        let session = Self {
            transport,
            shared,
            server_info: OnceLock::new(),
            next_id: AtomicU64::new(0),
            reader: Mutex::new(Some(reader)),
        };

        let result = session
            .request(methods::INITIALIZE, protocol::initialize_params())
            .await?;
        let server_info = MCPServerInfo::from_initialize_result(&result);

        info!(
            "Connected to MCP server: {} v{}",
            server_info.name, server_info.version
        );

        session
            .transport
            .send(protocol::notification(methods::INITIALIZED))
            .await?;
        let _ = session.server_info.set(server_info);

        Ok(session)
    }

    /// Send a JSON-RPC request and wait for its reply
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.shared.lock();
            if pending.closed {
                return Err(MCPError::TransportClosed);
            }
            pending.waiters.insert(id, tx);
        }
        let _slot = PendingSlot {
            shared: &self.shared,
            id,
        };

        debug!("Sending request: {}", method);
        self.transport
            .send(protocol::request(id, method, params))
            .await?;

        let reply = rx.await.map_err(|_| MCPError::TransportClosed)?;
        debug!("Received response for: {}", method);

        reply.map_err(|e| MCPError::Request(format!("{method}: {}", e.message)))
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Parse the entries of a list reply one by one, skipping malformed ones
fn parse_list<T: DeserializeOwned>(result: &Value, key: &str) -> Vec<T> {
    let Some(items) = result.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping malformed '{}' entry: {}", key, e);
                None
            }
        })
        .collect()
}

async fn read_loop(transport: ArcTransport, shared: Arc<Shared>) {
    while let Some(message) = transport.receive().await {
        match Incoming::classify(message) {
            Some(Incoming::Response { id, outcome }) => {
                let waiter = shared.lock().waiters.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!("Dropping response to abandoned request {}", id),
                }
            }
            Some(Incoming::Request { id, method, .. }) => {
                let reply = if method == methods::PING {
                    protocol::success_response(id, json!({}))
                } else {
                    protocol::error_response(
                        id,
                        codes::METHOD_NOT_FOUND,
                        &format!("Method not found: {method}"),
                    )
                };
                if let Err(e) = transport.send(reply).await {
                    debug!("Could not answer server request '{}': {}", method, e);
                }
            }
            Some(Incoming::Notification { method }) => {
                debug!("Server notification: {}", method);
            }
            None => warn!("Ignoring unrecognised message from MCP server"),
        }
    }

    debug!("Transport ended; failing outstanding requests");
    shared.shut();
}

#[async_trait]
impl McpSession for RpcSession {
    fn server_info(&self) -> Option<MCPServerInfo> {
        self.server_info.get().cloned()
    }

    fn is_connected(&self) -> bool {
        !self.shared.lock().closed && self.transport.state() == TransportState::Connected
    }

    async fn list_tools(&self) -> Result<Vec<MCPToolDefinition>> {
        let result = self.request(methods::TOOLS_LIST, json!({})).await?;
        Ok(parse_list(&result, "tools"))
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<MCPToolResult> {
        self.request_as(
            methods::TOOLS_CALL,
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    async fn list_resources(&self) -> Result<Vec<MCPResourceDefinition>> {
        let result = self.request(methods::RESOURCES_LIST, json!({})).await?;
        Ok(parse_list(&result, "resources"))
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<MCPResourceContent>> {
        let result = self
            .request(methods::RESOURCES_READ, json!({ "uri": uri }))
            .await?;
        Ok(parse_list(&result, "contents"))
    }

    async fn list_prompts(&self) -> Result<Vec<MCPPromptDefinition>> {
        let result = self.request(methods::PROMPTS_LIST, json!({})).await?;
        Ok(parse_list(&result, "prompts"))
    }

    async fn get_prompt(&self, name: &str, arguments: Map<String, Value>) -> Result<MCPPromptResult> {
        self.request_as(
            methods::PROMPTS_GET,
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.shared.shut();
        let result = self.transport.close().await;

        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }

        result
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}
