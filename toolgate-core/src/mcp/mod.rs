//! Model Context Protocol client
//!
//! The gateway's downstream executor is usually an MCP server. This module
//! speaks the client side of MCP over a line-oriented transport (child process
//! stdio, or an in-memory channel pair for tests) and exposes the server as a
//! [`ToolExecutor`](crate::executor::ToolExecutor).

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::McpClient;
pub use protocol::{ContentBlock, McpTool, ToolCallResult};
pub use transport::{ChannelTransport, ChildProcessTransport, ClientTransport};

/// Errors that can occur during MCP client operations
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse or encode JSON
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Server answered with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message from the server
        message: String,
    },

    /// Server sent something that is not valid MCP
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server process exited or the channel closed
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),
}
