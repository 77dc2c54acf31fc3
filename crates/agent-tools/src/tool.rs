//! Tool trait definition

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a tool hands back to the agent
///
/// Most tools answer with a single string. Tools that produce several
/// pieces of content (or non-text content such as images) return the
/// ordered list of content items untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// A single textual answer
    Text(String),
    /// Ordered content items, each a JSON object with a `type` field
    Content(Vec<Value>),
    /// Payload that was not a content list, passed through unchanged
    Raw(Value),
}

impl ToolOutput {
    /// Return the text if this is a textual answer
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Convert into a JSON value for agents that consume raw JSON
    pub fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Content(items) => Value::Array(items),
            Self::Raw(value) => value,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Trait for tools that agents can execute
///
/// Tools are functions that LLM agents can call to interact with the world.
/// Each tool must provide a name, description, and JSON schema for its input.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with given parameters
    ///
    /// # Arguments
    ///
    /// * `params` - Tool input as JSON value. Implementations may accept
    ///   loosely shaped input and coerce it toward `input_schema`.
    async fn execute(&self, params: Value) -> Result<ToolOutput>;

    /// Get the tool's name
    ///
    /// Must be unique within a ToolRegistry
    fn name(&self) -> &str;

    /// Get the tool's description
    ///
    /// This description helps the LLM understand when to use this tool
    fn description(&self) -> &str;

    /// Get the tool's input schema (JSON Schema format)
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    ///
    /// // Example schema for a calculator tool:
    /// let schema = json!({
    ///     "type": "object",
    ///     "properties": {
    ///         "a": { "type": "number" },
    ///         "b": { "type": "number" }
    ///     },
    ///     "required": ["a", "b"]
    /// });
    /// ```
    fn input_schema(&self) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_into_value() {
        assert_eq!(ToolOutput::Text("8".to_string()).into_value(), json!("8"));
        assert_eq!(
            ToolOutput::Content(vec![json!({"type": "image"})]).into_value(),
            json!([{"type": "image"}])
        );
        assert_eq!(ToolOutput::Raw(json!({"k": 1})).into_value(), json!({"k": 1}));
    }

    #[test]
    fn test_output_as_text() {
        assert_eq!(ToolOutput::from("hi".to_string()).as_text(), Some("hi"));
        assert!(ToolOutput::Raw(Value::Null).as_text().is_none());
    }

    #[test]
    fn test_output_serializes_untagged() {
        let text = serde_json::to_value(ToolOutput::Text("x".to_string())).unwrap();
        assert_eq!(text, json!("x"));
    }
}
