//! Connection registry for coordinating multiple MCP server connections

use agent_tools::ToolOutput;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ArcMcpSession, RpcSession};
use crate::Result;
use crate::config::{ConnectionSpec, InProcessSpec, MCPConfig, PipeSpec, StreamSpec, TransportKind};
use crate::error::MCPError;
use crate::protocol::MCPToolDefinition;
use crate::server::McpServer;
use crate::tool::{MCPTool, ToolOptions};
use crate::transport;

/// Releases whatever a connection holds; run once by [`ConnectionRegistry::close`]
pub type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registry-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Bound on opening a transport plus the handshake, and on the catalog fetch
    pub connect_timeout: Duration,
    /// Default deadline for each tool call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
    /// Validate coerced arguments against each tool's schema before calling
    pub strict_schema: bool,
    /// Prefer a lone text item over the full content list
    pub prefer_text_summary: bool,
    /// How long a single cleanup action may take before it is abandoned
    pub close_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            call_timeout: None,
            strict_schema: false,
            prefer_text_summary: false,
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryOptions {
    fn tool_options(&self) -> ToolOptions {
        ToolOptions {
            timeout: self.call_timeout,
            strict_schema: self.strict_schema,
            prefer_text_summary: self.prefer_text_summary,
        }
    }
}

/// One live connection
struct Connection {
    kind: Option<TransportKind>,
    session: ArcMcpSession,
    tools: Vec<Arc<MCPTool>>,
    cleanup: Option<CleanupAction>,
}

/// Owns every server connection of an agent
///
/// The registry handles:
/// - Validating and storing connection specs
/// - Connecting all of them, isolating failures per connection
/// - Exposing each connection's session and tools
/// - Releasing everything on `close`
///
/// `close` drains the connection map. Callers must not run it while
/// invocations on those connections are still in flight.
pub struct ConnectionRegistry {
    options: RegistryOptions,

    /// Registered specs (server_name -> spec)
    specs: RwLock<HashMap<String, ConnectionSpec>>,

    /// Live connections (server_name -> connection)
    connections: RwLock<HashMap<String, Connection>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry with default options
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    /// Create an empty registry
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            options,
            specs: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Register a spec under `name`, replacing any previous spec of that name
    ///
    /// Returns false (and logs) if the spec is missing a field its transport
    /// requires; nothing is stored in that case.
    pub async fn register(&self, name: impl Into<String>, spec: ConnectionSpec) -> bool {
        let name = name.into();
        if let Err(e) = spec.validate() {
            warn!("Dropping MCP server spec '{}': {}", name, e);
            return false;
        }

        debug!("Registered {} MCP server spec '{}'", spec.kind(), name);
        self.specs.write().await.insert(name, spec);
        true
    }

    /// Register every valid server of a configuration; returns how many were accepted
    pub async fn register_config(&self, config: &MCPConfig) -> usize {
        let mut accepted = 0;
        for (name, spec) in config.connection_specs() {
            if self.register(name, spec).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Names of all registered specs, sorted
    pub async fn registered_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Connect every registered spec
    ///
    /// Connections are attempted concurrently and independently: a failure
    /// to open, handshake or list tools is logged and only affects that
    /// connection. Returns the tools of every connection established by
    /// this call.
    pub async fn connect_all(&self) -> HashMap<String, Vec<Arc<MCPTool>>> {
        let specs: Vec<(String, ConnectionSpec)> = self
            .specs
            .read()
            .await
            .iter()
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();
        let total = specs.len();

        let attempts = specs.into_iter().map(|(name, spec)| async move {
            let result = self.establish(&name, &spec).await;
            (name, result)
        });

        let mut connected = HashMap::new();
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(connection) => {
                    info!(
                        "Successfully connected to MCP server: {} ({} tools)",
                        name,
                        connection.tools.len()
                    );
                    connected.insert(name.clone(), connection.tools.clone());
                    self.store(name, connection).await;
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to MCP server {}: {}. Continuing without it.",
                        name, e
                    );
                }
            }
        }

        if connected.is_empty() && total > 0 {
            warn!("No MCP servers connected. Agent will work without MCP tools.");
        } else {
            info!("Connected to {}/{} MCP servers", connected.len(), total);
        }

        connected
    }

    /// Open, handshake and load tools for one spec
    async fn establish(&self, name: &str, spec: &ConnectionSpec) -> Result<Connection> {
        info!("Creating {} MCP connection: {}", spec.kind(), name);
        let transport = transport::from_spec(spec)?;
        let kind = transport.kind();

        let handshake =
            tokio::time::timeout(self.options.connect_timeout, RpcSession::connect(transport.clone()))
                .await;

        let session: ArcMcpSession = match handshake {
            Ok(Ok(session)) => Arc::new(session),
            Ok(Err(e)) => {
                let _ = transport.close().await;
                return Err(match e {
                    MCPError::Connection(_) => e,
                    other => MCPError::Connection(other.to_string()),
                });
            }
            Err(_) => {
                let _ = transport.close().await;
                return Err(MCPError::Connection(format!(
                    "no handshake within {:?}",
                    self.options.connect_timeout
                )));
            }
        };

        let tools = self.load_tools(name, &session).await;

        let cleanup_session = session.clone();
        let cleanup: CleanupAction =
            Box::new(move || async move { cleanup_session.close().await }.boxed());

        Ok(Connection {
            kind: Some(kind),
            session,
            tools,
            cleanup: Some(cleanup),
        })
    }

    /// Fetch the catalog and wrap each entry; a failed fetch yields no tools
    async fn load_tools(&self, name: &str, session: &ArcMcpSession) -> Vec<Arc<MCPTool>> {
        let listing = tokio::time::timeout(self.options.connect_timeout, session.list_tools())
            .await
            .map_err(|_| {
                MCPError::CapabilityLoad(format!(
                    "tools/list timed out after {:?}",
                    self.options.connect_timeout
                ))
            })
            .and_then(|listed| listed.map_err(|e| MCPError::CapabilityLoad(e.to_string())));

        match listing {
            Ok(definitions) => {
                info!("Discovered {} tools from server: {}", definitions.len(), name);
                self.wrap_tools(name, session, definitions)
            }
            Err(e) => {
                warn!("MCP server {} contributes no tools: {}", name, e);
                Vec::new()
            }
        }
    }

    fn wrap_tools(
        &self,
        name: &str,
        session: &ArcMcpSession,
        definitions: Vec<MCPToolDefinition>,
    ) -> Vec<Arc<MCPTool>> {
        definitions
            .into_iter()
            .map(|definition| {
                Arc::new(MCPTool::new(
                    name,
                    definition,
                    session.clone(),
                    self.options.tool_options(),
                ))
            })
            .collect()
    }

    /// Store a connection, releasing the one it supersedes
    async fn store(&self, name: String, connection: Connection) {
        let previous = self.connections.write().await.insert(name.clone(), connection);
        if let Some(previous) = previous {
            debug!("Replacing existing connection: {}", name);
            if let Some(cleanup) = previous.cleanup {
                run_cleanup(&name, cleanup, self.options.close_timeout).await;
            }
        }
    }

    /// Attach a session established elsewhere
    ///
    /// `cleanup` runs when the registry is closed or the name is reused.
    pub async fn adopt(
        &self,
        name: impl Into<String>,
        session: ArcMcpSession,
        definitions: Vec<MCPToolDefinition>,
        cleanup: Option<CleanupAction>,
    ) -> Vec<Arc<MCPTool>> {
        let name = name.into();
        let tools = self.wrap_tools(&name, &session, definitions);
        self.store(
            name,
            Connection {
                kind: None,
                session,
                tools: tools.clone(),
                cleanup,
            },
        )
        .await;
        tools
    }

    /// Session of a live connection
    pub async fn get_session(&self, name: &str) -> Option<ArcMcpSession> {
        let connections = self.connections.read().await;
        connections.get(name).map(|c| c.session.clone())
    }

    /// Tools of a live connection; empty for unknown names
    pub async fn get_tools(&self, name: &str) -> Vec<Arc<MCPTool>> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .map(|c| c.tools.clone())
            .unwrap_or_default()
    }

    /// Tools of every live connection, ordered by server name
    pub async fn all_tools(&self) -> Vec<Arc<MCPTool>> {
        let connections = self.connections.read().await;
        let mut names: Vec<&String> = connections.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| connections[name].tools.iter().cloned())
            .collect()
    }

    /// Transport kind of a live connection; `None` for unknown or adopted ones
    pub async fn transport_kind(&self, name: &str) -> Option<TransportKind> {
        let connections = self.connections.read().await;
        connections.get(name).and_then(|c| c.kind)
    }

    /// Get list of connected server names, sorted
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if any servers are connected
    pub async fn has_connections(&self) -> bool {
        !self.connections.read().await.is_empty()
    }

    /// Check health of all connected servers
    ///
    /// Returns a map of server names to their connection status.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let connections = self.connections.read().await;
        let mut status = HashMap::new();

        for (name, connection) in connections.iter() {
            let is_connected = connection.session.is_connected();
            status.insert(name.clone(), is_connected);

            if !is_connected {
                warn!("Server {} is not connected", name);
            }
        }

        status
    }

    /// Reconnect to a specific server from its registered spec
    ///
    /// The new connection replaces the old one, whose cleanup runs.
    pub async fn reconnect(&self, name: &str) -> Result<Vec<Arc<MCPTool>>> {
        let spec = self
            .specs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MCPError::ServerNotFound(name.to_string()))?;

        info!("Reconnecting to MCP server: {}", name);
        let connection = self.establish(name, &spec).await?;
        let tools = connection.tools.clone();
        self.store(name.to_string(), connection).await;

        info!("Successfully reconnected to MCP server: {}", name);
        Ok(tools)
    }

    /// Invoke a tool on the named server
    pub async fn call_tool(&self, server_name: &str, tool_name: &str, input: Value) -> Result<ToolOutput> {
        let tool = {
            let connections = self.connections.read().await;
            let connection = connections
                .get(server_name)
                .ok_or_else(|| MCPError::ServerNotFound(server_name.to_string()))?;
            connection
                .tools
                .iter()
                .find(|tool| tool.definition().name == tool_name)
                .cloned()
                .ok_or_else(|| {
                    MCPError::invocation(
                        tool_name,
                        format!("Tool '{tool_name}' not found on server '{server_name}'"),
                    )
                })?
        };

        tool.invoke(input).await
    }

    /// Release every connection and forget all specs
    ///
    /// Every cleanup action runs exactly once, all of them concurrently.
    /// A cleanup that fails, panics or outlives `close_timeout` is logged
    /// and does not hold up the rest.
    pub async fn close(&self) {
        let drained: Vec<(String, Connection)> =
            self.connections.write().await.drain().collect();
        let limit = self.options.close_timeout;

        let releases = drained.into_iter().map(|(name, connection)| async move {
            info!("Disconnecting from MCP server: {}", name);
            if let Some(cleanup) = connection.cleanup {
                run_cleanup(&name, cleanup, limit).await;
            }
        });
        join_all(releases).await;

        self.specs.write().await.clear();
        info!("All MCP servers disconnected");
    }

    /// Replace every connection with a single pipe connection
    ///
    /// Like the other `connect_via_*` methods this closes all existing
    /// connections first; it does not add to them.
    pub async fn connect_via_pipe(&self, name: &str, spec: PipeSpec) -> Vec<Arc<MCPTool>> {
        self.replace_with(name, ConnectionSpec::Pipe(spec)).await
    }

    /// Replace every connection with a single event-stream connection
    pub async fn connect_via_stream(&self, name: &str, spec: StreamSpec) -> Vec<Arc<MCPTool>> {
        self.replace_with(name, ConnectionSpec::Stream(spec)).await
    }

    /// Replace every connection with a single in-process connection
    pub async fn connect_in_process(
        &self,
        name: &str,
        server: Arc<dyn McpServer>,
    ) -> Vec<Arc<MCPTool>> {
        self.replace_with(name, ConnectionSpec::InProcess(InProcessSpec::new(server)))
            .await
    }

    async fn replace_with(&self, name: &str, spec: ConnectionSpec) -> Vec<Arc<MCPTool>> {
        self.close().await;
        if !self.register(name, spec).await {
            return Vec::new();
        }
        self.connect_all().await.remove(name).unwrap_or_default()
    }
}

async fn run_cleanup(name: &str, cleanup: CleanupAction, limit: Duration) {
    let guarded = AssertUnwindSafe(async move { cleanup().await }).catch_unwind();

    match tokio::time::timeout(limit, guarded).await {
        Ok(Ok(Ok(()))) => debug!("Released MCP connection: {}", name),
        Ok(Ok(Err(e))) => warn!("Error disconnecting from {}: {}", name, e),
        Ok(Err(_)) => warn!("Cleanup for {} panicked", name),
        Err(_) => warn!(
            "Cleanup for {} did not finish within {:?}; abandoning it",
            name, limit
        ),
    }
}
