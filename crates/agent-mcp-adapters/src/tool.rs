//! MCPTool: one remote tool exposed through the agent-tools `Tool` trait

use agent_tools::{Tool, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;
use crate::client::ArcMcpSession;
use crate::coerce::coerce_input;
use crate::error::MCPError;
use crate::protocol::{MCPToolDefinition, MCPToolResult};
use crate::schema;

/// Message used when a failed result carries no text
const GENERIC_FAILURE: &str = "execution failed";

/// Knobs shared by every tool of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolOptions {
    /// Deadline for a single call; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Check coerced arguments against the normalized schema before calling
    pub strict_schema: bool,
    /// When a result has several items but exactly one is text, return that text
    pub prefer_text_summary: bool,
}

/// Wrapper that implements agent-tools::Tool for MCP tools
///
/// Holds the repaired input schema and the session of the connection the
/// tool came from. Every `invoke` sends exactly one `tools/call` request.
pub struct MCPTool {
    server_name: String,
    definition: MCPToolDefinition,
    schema: Value,
    session: ArcMcpSession,
    options: ToolOptions,
}

impl MCPTool {
    /// Create a new MCPTool
    ///
    /// The server-supplied schema is normalized here. If it cannot be
    /// repaired at all the tool is still created, with an unconstrained
    /// object schema.
    pub fn new(
        server_name: impl Into<String>,
        definition: MCPToolDefinition,
        session: ArcMcpSession,
        options: ToolOptions,
    ) -> Self {
        let server_name = server_name.into();
        let schema = schema::try_normalize_schema(definition.input_schema.as_ref())
            .unwrap_or_else(|e| {
                warn!(
                    "Tool '{}' from '{}' gets an empty schema: {}",
                    definition.name, server_name, e
                );
                schema::empty_object_schema()
            });

        Self {
            server_name,
            definition,
            schema,
            session,
            options,
        }
    }

    /// Get the server name this tool belongs to
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The definition as the server published it
    pub fn definition(&self) -> &MCPToolDefinition {
        &self.definition
    }

    /// The normalized input schema
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn options(&self) -> ToolOptions {
        self.options
    }

    /// Call the tool with loosely shaped input
    pub async fn invoke(&self, input: Value) -> Result<ToolOutput> {
        let name = &self.definition.name;
        let arguments = coerce_input(input);

        if self.options.strict_schema {
            schema::validate_arguments(&arguments, &self.schema)
                .map_err(|message| MCPError::invocation(name, message))?;
        }

        debug!("Calling tool '{}' on '{}'", name, self.server_name);
        let call = self.session.call_tool(name, arguments);

        let outcome = match self.options.timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| MCPError::Timeout {
                    tool: name.clone(),
                    after,
                })?,
            None => call.await,
        };

        let result = outcome.map_err(|e| match e {
            MCPError::Invocation { .. } | MCPError::Timeout { .. } => e,
            other => MCPError::invocation(name, format!("MCP tool '{name}' failed: {other}")),
        })?;

        self.normalize_result(result)
    }

    /// Turn a `tools/call` result into the downstream output shape
    fn normalize_result(&self, result: MCPToolResult) -> Result<ToolOutput> {
        if result.is_error.unwrap_or(false) {
            let message = first_text(&result.content).unwrap_or(GENERIC_FAILURE);
            return Err(MCPError::invocation(&self.definition.name, message));
        }

        let items = match result.content {
            Value::Array(items) => items,
            other => return Ok(ToolOutput::Raw(other)),
        };

        if items.is_empty() {
            return Ok(ToolOutput::Text(String::new()));
        }

        if let [only] = items.as_slice() {
            if is_text(only) {
                return Ok(ToolOutput::Text(text_of(only).to_string()));
            }
        }

        if self.options.prefer_text_summary {
            let mut texts = items.iter().filter(|item| is_text(item));
            if let (Some(text), None) = (texts.next(), texts.next()) {
                return Ok(ToolOutput::Text(text_of(text).to_string()));
            }
        }

        Ok(ToolOutput::Content(items))
    }
}

fn is_text(item: &Value) -> bool {
    item.get("type").and_then(Value::as_str) == Some("text")
}

fn text_of(item: &Value) -> &str {
    item.get("text").and_then(Value::as_str).unwrap_or_default()
}

fn first_text(content: &Value) -> Option<&str> {
    content
        .as_array()?
        .iter()
        .find(|item| is_text(item))
        .map(text_of)
}

#[async_trait]
impl Tool for MCPTool {
    async fn execute(&self, params: Value) -> agent_tools::Result<ToolOutput> {
        Ok(self.invoke(params).await?)
    }

    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        self.definition
            .description
            .as_deref()
            .unwrap_or("No description available")
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }
}
