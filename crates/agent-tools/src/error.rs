//! Error types for tool execution

use std::time::Duration;
use thiserror::Error;

/// Result type alias for tool execution
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error surfaced to an agent when a tool call does not succeed
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool ran and reported failure
    #[error("{message}")]
    Execution { tool: String, message: String },

    /// The tool did not answer in time
    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    /// The tool's backing service is not available
    #[error("Tool unavailable: {0}")]
    Unavailable(String),

    /// Tool not found in the registry
    #[error("Tool not found: {0}")]
    NotFound(String),
}
