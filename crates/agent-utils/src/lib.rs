//! Shared utilities for agent-rs
//!
//! This crate provides common functionality used across the agent-rs workspace.

pub mod logging;

pub use logging::{LogFormat, init_tracing, init_tracing_with};
