//! Tool executor boundary
//!
//! The executor performs the real action once a call is allowed. It receives
//! the tool name and the outbound arguments (identity already attached) and
//! returns the raw output for the caller. Executors may enforce policy again on
//! their side; such denials surface as text in the output and are detected by
//! the gateway, not here.

pub mod memory;

use crate::mcp::ContentBlock;
use crate::request::Arguments;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::{RecordedCall, RecordingExecutor};

/// Output of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Content blocks returned by the tool
    pub content: Vec<ContentBlock>,

    /// Whether the tool flagged its own output as an error
    #[serde(default)]
    pub is_error: bool,

    /// Raw result as returned by the executor
    #[serde(default)]
    pub raw: Value,
}

impl ToolOutput {
    /// Create an output with a single text block
    pub fn text(text: impl Into<String>) -> Self {
        let block = ContentBlock::text(text);
        let raw = serde_json::json!({ "content": [block] });
        Self {
            content: vec![block],
            is_error: false,
            raw,
        }
    }

    /// Mark the output as an error
    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// All text blocks in order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(ContentBlock::as_text)
    }

    /// First text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.texts().next()
    }

    /// Text block containing `marker`
    pub fn marker_text(&self, marker: &str) -> Option<&str> {
        if marker.is_empty() {
            return None;
        }
        self.texts().find(|t| t.contains(marker))
    }
}

/// Errors from the executor (all transient from the gateway's view)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Could not reach the executor
    #[error("Executor transport error: {0}")]
    Transport(String),

    /// Executor ran the tool and it failed
    #[error("Tool execution failed: {0}")]
    Execution(String),

    /// Executor is not available
    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

/// Performs tool calls after authorization
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `tool_name` with `arguments`
    async fn execute(&self, tool_name: &str, arguments: Arguments) -> Result<ToolOutput, ExecutorError>;
}
