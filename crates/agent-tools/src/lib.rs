//! Tool management and execution framework for agent-rs
//!
//! This crate defines the contract between an agent and the callable units
//! ("tools") it can invoke, independent of where those tools are implemented.

pub mod error;
pub mod registry;
pub mod tool;

pub use error::{Result, ToolError};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolOutput};
