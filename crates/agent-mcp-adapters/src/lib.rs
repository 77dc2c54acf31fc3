//! Model Context Protocol (MCP) adapters for agent-rs
//!
//! This crate connects agents to MCP servers and exposes the servers' tools
//! through the agent-tools `Tool` trait:
//! - Connect over a child process's stdio, an HTTP event stream, or an
//!   in-process link to a server object
//! - Repair remote input schemas so downstream tool-calling APIs accept them
//! - Coerce loosely shaped model input into tool arguments
//! - Keep failures of one server from affecting the others
//!
//! # Example
//!
//! ```no_run
//! use agent_mcp_adapters::config::MCPConfig;
//! use agent_mcp_adapters::ConnectionRegistry;
//! use serde_json::json;
//!
//! # async fn example() -> agent_mcp_adapters::Result<()> {
//! let connections = ConnectionRegistry::new();
//! connections.register_config(&MCPConfig::load_merged()).await;
//!
//! // Failed servers are logged and skipped
//! let tools = connections.connect_all().await;
//! println!("Connected {} servers", tools.len());
//!
//! let output = connections
//!     .call_tool("calculator", "add", json!({"a": 5, "b": 3}))
//!     .await?;
//! println!("{output:?}");
//!
//! connections.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod coerce;
pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod schema;
pub mod server;
pub mod tool;
pub mod transport;

// Re-export commonly used types
pub use client::{ArcMcpSession, ConnectionRegistry, McpSession, RegistryOptions, RpcSession};
pub use config::{ConnectionSpec, InProcessSpec, MCPConfig, PipeSpec, StreamSpec, TransportKind};
pub use error::MCPError;
pub use retry::RetryPolicy;
pub use server::{McpServer, serve};
pub use tool::{MCPTool, ToolOptions};
pub use transport::{Transport, TransportState};

/// Result type for MCP operations
pub type Result<T> = std::result::Result<T, MCPError>;
