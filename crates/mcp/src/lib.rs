//! Client side of the Model Context Protocol.
//!
//! Connects to the remote tool servers listed in configuration, discovers the
//! tools they expose and forwards calls to them.
//!
//! - `RemoteToolClient`: one live session with one server
//! - `connect_all`: opens a session per configured server

mod client;

pub use client::{connect_all, render_call_result, RemoteToolClient, RemoteToolSpec};

use thiserror::Error;

/// Errors raised while talking to a remote tool server
#[derive(Error, Debug)]
pub enum McpError {
    #[error("could not start tool server `{server}`: {source}")]
    Spawn { server: String, source: std::io::Error },

    #[error("handshake with tool server `{server}` failed: {message}")]
    Handshake { server: String, message: String },

    #[error("request to tool server `{server}` failed: {message}")]
    Request { server: String, message: String },

    #[error("tool server `{server}` uses the unsupported `{transport}` transport")]
    UnsupportedTransport { server: String, transport: &'static str },

    #[error("tool `{tool}` reported an error: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("tool arguments must be a JSON object, got: {0}")]
    InvalidArguments(String),
}

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;
