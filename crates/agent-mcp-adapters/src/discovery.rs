//! Tool discovery and registration
//!
//! This module exposes the tools of live connections to agent-rs by
//! registering them into a `ToolRegistry`.

use agent_tools::ToolRegistry;
use tracing::{debug, info};

use crate::client::ConnectionRegistry;

/// Register every tool of every live connection into a ToolRegistry
///
/// Tools are registered under their own names; if two servers publish a
/// tool with the same name, the one from the server that sorts last wins.
///
/// # Returns
///
/// Number of tools registered
///
/// # Example
///
/// ```no_run
/// use agent_mcp_adapters::config::MCPConfig;
/// use agent_mcp_adapters::discovery::discover_and_register_tools;
/// use agent_mcp_adapters::ConnectionRegistry;
/// use agent_tools::ToolRegistry;
///
/// # async fn example() {
/// let connections = ConnectionRegistry::new();
/// connections.register_config(&MCPConfig::load_merged()).await;
/// connections.connect_all().await;
///
/// let registry = ToolRegistry::new();
/// let count = discover_and_register_tools(&connections, &registry).await;
/// println!("Registered {count} MCP tools");
/// # }
/// ```
pub async fn discover_and_register_tools(
    connections: &ConnectionRegistry,
    registry: &ToolRegistry,
) -> usize {
    info!("Registering MCP tools from live connections");

    let tools = connections.all_tools().await;
    let count = tools.len();

    for tool in tools {
        debug!(
            "Registered MCP tool '{}' from server '{}'",
            tool.definition().name,
            tool.server_name()
        );
        registry.register(tool);
    }

    info!("Successfully registered {} MCP tools into registry", count);
    count
}

/// Names of all tools across live connections, ordered by server
pub async fn list_available_tools(connections: &ConnectionRegistry) -> Vec<String> {
    connections
        .all_tools()
        .await
        .iter()
        .map(|tool| tool.definition().name.clone())
        .collect()
}

/// Names of the tools of one server; empty if it is not connected
pub async fn list_server_tools(connections: &ConnectionRegistry, server_name: &str) -> Vec<String> {
    connections
        .get_tools(server_name)
        .await
        .iter()
        .map(|tool| tool.definition().name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSpec, InProcessSpec};
    use crate::protocol::MCPToolResult;
    use crate::server::test_support::{Behaviour, ScriptedServer};
    use serde_json::json;

    async fn connected() -> ConnectionRegistry {
        let connections = ConnectionRegistry::new();
        let math = ScriptedServer::new("math")
            .tool("add", None, Behaviour::Reply(MCPToolResult::text("8")))
            .tool("sub", None, Behaviour::Reply(MCPToolResult::text("2")))
            .into_arc();
        let web = ScriptedServer::new("web")
            .tool("fetch", None, Behaviour::Echo)
            .into_arc();

        connections
            .register("math", ConnectionSpec::InProcess(InProcessSpec::new(math)))
            .await;
        connections
            .register("web", ConnectionSpec::InProcess(InProcessSpec::new(web)))
            .await;
        connections.connect_all().await;
        connections
    }

    #[tokio::test]
    async fn test_discover_tools_empty() {
        let connections = ConnectionRegistry::new();
        let registry = ToolRegistry::new();

        assert!(list_available_tools(&connections).await.is_empty());
        assert_eq!(discover_and_register_tools(&connections, &registry).await, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_and_execute_through_registry() {
        let connections = connected().await;
        let registry = ToolRegistry::new();

        assert_eq!(discover_and_register_tools(&connections, &registry).await, 3);
        assert_eq!(registry.len(), 3);

        let output = registry.execute("add", json!({"a": 5, "b": 3})).await.unwrap();
        assert_eq!(output.as_text(), Some("8"));
    }

    #[tokio::test]
    async fn test_listing() {
        let connections = connected().await;

        assert_eq!(
            list_available_tools(&connections).await,
            vec!["add", "sub", "fetch"]
        );
        assert_eq!(list_server_tools(&connections, "web").await, vec!["fetch"]);
        assert!(list_server_tools(&connections, "nope").await.is_empty());
    }
}
