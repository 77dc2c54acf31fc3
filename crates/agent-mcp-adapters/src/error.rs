//! Error types for MCP operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during MCP operations
///
/// The first six variants form the failure taxonomy the registry and the
/// invocation adapter reason about. Connection, catalog and schema failures
/// are absorbed (logged, availability degraded); invocation and timeout
/// failures reach the caller.
#[derive(Error, Debug)]
pub enum MCPError {
    /// Malformed connection spec; the spec is dropped
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport or handshake failure; the connection is omitted
    #[error("MCP connection failed: {0}")]
    Connection(String),

    /// Catalog fetch failure; the connection contributes no tools
    #[error("Failed to load capabilities: {0}")]
    CapabilityLoad(String),

    /// Schema repair failure; the tool falls back to an empty schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Remote execution failed or the input could not be shaped into arguments
    #[error("{message}")]
    Invocation {
        /// Name of the tool that failed
        tool: String,
        /// Caller-facing message, passed through verbatim from the server when available
        message: String,
    },

    /// No response arrived before the deadline
    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout {
        /// Name of the tool that timed out
        tool: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// Not connected to MCP server
    #[error("Not connected to MCP server")]
    NotConnected,

    /// The transport closed while a request was outstanding
    #[error("Transport closed")]
    TransportClosed,

    /// JSON-RPC level failure reported by the server
    #[error("MCP request failed: {0}")]
    Request(String),

    /// MCP server not found
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// Invalid pattern error
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

impl MCPError {
    /// Build an invocation failure for `tool`
    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this failure came from the transport or session tier
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::TransportClosed
                | Self::Request(_)
                | Self::Io(_)
        )
    }
}

/// Convert MCPError to the tool-framework error shape
impl From<MCPError> for agent_tools::ToolError {
    fn from(err: MCPError) -> Self {
        match err {
            MCPError::Invocation { tool, message } => {
                agent_tools::ToolError::Execution { tool, message }
            }
            MCPError::Timeout { tool, after } => agent_tools::ToolError::Timeout { tool, after },
            other => agent_tools::ToolError::Unavailable(other.to_string()),
        }
    }
}
