//! # Toolgate - Policy-Gated Tool Invocation
//!
//! Toolgate puts a policy authority between an agent and the tools it calls:
//! - Every attempt is verified against the tool's policy before dispatch
//! - Policy contexts are enriched with per-tool defaults
//! - Denials can be retried with adjusted arguments (bounded, linear backoff)
//! - The gateway identity is attached to every outbound call
//! - Server-side denials in tool output are detected after a client-side allow
//! - Results are typed and render deterministically for LLM tool-use loops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolgate_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let authority = Arc::new(
//!         InMemoryDecisionClient::allow_all()
//!             .deny_above("finance.payment.refund.v1", "amount", 500_000.0),
//!     );
//!     let executor = Arc::new(McpClient::spawn("finance-mcp-server", &[]).await?);
//!
//!     let gateway = Gateway::builder("ap_finance_bot", authority, executor).build()?;
//!
//!     let result = gateway
//!         .invoke_json(
//!             "process_refund",
//!             serde_json::json!({"amount": 1_000_000, "currency": "USD"}),
//!             InvokeOptions::new().with_retry_on_denial(true),
//!         )
//!         .await;
//!
//!     println!("{}", result.to_model_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Resolver**: static tool name to policy id table
//! - **Context builder**: identity + arguments + enrichment defaults
//! - **Decision client**: the external policy authority
//! - **Retry planner**: argument adjustment and backoff after a denial
//! - **Gateway**: the sequential verify-dispatch-retry state machine
//! - **Executor**: the downstream tool runner (MCP over stdio, or any
//!   [`ToolExecutor`](executor::ToolExecutor))

pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod identity;
pub mod mcp;
pub mod options;
pub mod request;
pub mod resolver;
pub mod retry;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::context::{ContextBuilder, EnrichmentRule, PolicyContext, StaticDefaults};
    pub use crate::decision::{
        DecisionClient, DecisionError, DenialReason, InMemoryDecisionClient, PolicyDecision,
    };
    pub use crate::error::{GatewayError, Result};
    pub use crate::executor::{ExecutorError, RecordingExecutor, ToolExecutor, ToolOutput};
    pub use crate::gateway::{
        AttemptDisposition, AttemptRecord, DenialSource, FailureKind, Gateway, GatewayBuilder,
        InvocationError, Outcome, OutcomeKind, ToolResult,
    };
    pub use crate::identity::Identity;
    pub use crate::mcp::{ChannelTransport, ClientTransport, ContentBlock, McpClient, McpError};
    pub use crate::options::{InvokeDefaults, InvokeOptions};
    pub use crate::request::{Arguments, ToolCallRequest};
    pub use crate::resolver::{PolicyResolver, ToolAliases};
    pub use crate::retry::{AdjustmentRule, HalveReducible, RetryPlan, RetryPlanner};
}
