//! Client sessions with MCP servers

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::Result;
use crate::protocol::{
    MCPPromptDefinition, MCPPromptResult, MCPResourceContent, MCPResourceDefinition,
    MCPServerInfo, MCPToolDefinition, MCPToolResult,
};

pub mod manager;
pub mod session;

pub use manager::{CleanupAction, ConnectionRegistry, RegistryOptions};
pub use session::RpcSession;

/// An initialized session with one server
///
/// Every primitive a session offers is declared here; there is no runtime
/// probing for optional methods.
///
/// Note: All methods use &self (not &mut self) to enable use through Arc.
/// Implementations use interior mutability for state changes.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Server identity from the handshake
    fn server_info(&self) -> Option<MCPServerInfo>;

    /// Whether the session can still carry requests
    fn is_connected(&self) -> bool;

    /// List available tools
    async fn list_tools(&self) -> Result<Vec<MCPToolDefinition>>;

    /// Call a tool
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<MCPToolResult>;

    /// List available resources
    async fn list_resources(&self) -> Result<Vec<MCPResourceDefinition>>;

    /// Read a resource
    async fn read_resource(&self, uri: &str) -> Result<Vec<MCPResourceContent>>;

    /// List available prompts
    async fn list_prompts(&self) -> Result<Vec<MCPPromptDefinition>>;

    /// Get a prompt
    async fn get_prompt(&self, name: &str, arguments: Map<String, Value>) -> Result<MCPPromptResult>;

    /// End the session; calling it again is a no-op
    async fn close(&self) -> Result<()>;
}

/// Type alias for Arc-wrapped MCP session
pub type ArcMcpSession = Arc<dyn McpSession>;
