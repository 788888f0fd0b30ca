//! Invocation results
//!
//! Every `invoke` call returns a [`ToolResult`]. Failures are data, not `Err`:
//! an LLM tool-use loop can always render the result deterministically with
//! [`ToolResult::to_model_text`].

use crate::decision::{DecisionError, PolicyDecision};
use crate::error::GatewayError;
use crate::executor::{ExecutorError, ToolOutput};
use crate::request::{Arguments, ToolCallRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Fallback text when a successful tool returns no text content
pub const EMPTY_SUCCESS_TEXT: &str = "Tool executed successfully";

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unmapped tool, invalid policy id, missing enrichment rule (never retried)
    PermanentConfig,

    /// Policy authority unreachable after all attempts
    TransientAuthority,

    /// Executor failed after all attempts
    TransientExecutor,

    /// Overall deadline elapsed
    Timeout,

    /// Cancelled by the caller
    Cancelled,
}

impl FailureKind {
    /// Whether a fresh invocation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::TransientAuthority | FailureKind::TransientExecutor | FailureKind::Timeout
        )
    }

    /// Whether retrying can never help
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::PermanentConfig | FailureKind::Cancelled)
    }
}

/// Structured terminal failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    /// Failure kind
    pub kind: FailureKind,

    /// Human-readable message
    pub message: String,

    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl InvocationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Permanent configuration failure from a gateway error
    pub fn permanent(err: &GatewayError) -> Self {
        Self::new(FailureKind::PermanentConfig, err.to_string()).with_code(err.code())
    }

    /// Failure from the policy authority
    pub fn authority(err: &DecisionError) -> Self {
        match err {
            DecisionError::AuthorityUnreachable(_) => {
                Self::new(FailureKind::TransientAuthority, err.to_string())
                    .with_code("AUTHORITY_UNREACHABLE")
            }
            DecisionError::InvalidPolicyId(id) => {
                Self::permanent(&GatewayError::InvalidPolicyId(id.clone()))
            }
        }
    }

    /// Failure from the executor
    pub fn executor(err: &ExecutorError) -> Self {
        let code = match err {
            ExecutorError::Transport(_) => "EXECUTOR_TRANSPORT",
            ExecutorError::Execution(_) => "EXECUTION_FAILED",
            ExecutorError::Unavailable(_) => "EXECUTOR_UNAVAILABLE",
        };
        Self::new(FailureKind::TransientExecutor, err.to_string()).with_code(code)
    }

    /// Overall deadline elapsed
    pub fn timeout(limit: Option<Duration>) -> Self {
        let message = match limit {
            Some(limit) => format!("Invocation timed out after {:?}", limit),
            None => "Invocation timed out".to_string(),
        };
        Self::new(FailureKind::Timeout, message).with_code("TIMEOUT")
    }

    /// Cancelled by the caller
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "Invocation cancelled").with_code("CANCELLED")
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for InvocationError {}

/// Where a denial came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialSource {
    /// The policy authority denied before dispatch
    Authority,

    /// The executor denied after a client-side allow
    Server,
}

/// Terminal outcome of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Tool executed after an allow decision
    Success {
        /// Tool output
        output: ToolOutput,
    },

    /// Policy denied the call
    Denied {
        /// Final denial decision
        decision: PolicyDecision,
        /// Where the denial came from
        source: DenialSource,
    },

    /// Invocation failed
    Failed {
        /// Structured failure
        error: InvocationError,
    },
}

/// Outcome discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Denied,
    Failed,
}

/// What happened in one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    /// Permanent configuration failure before or at the authority
    Rejected,

    /// Authority denied
    Denied,

    /// Authority unreachable
    AuthorityError,

    /// Dispatched and the tool returned output
    Dispatched,

    /// Dispatched and the executor reported a policy denial
    ServerDenied,

    /// Dispatched and the executor failed
    ExecutorError,

    /// Deadline or cancellation hit during the attempt
    Interrupted,
}

/// Audit record for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0-based attempt index
    pub index: u32,

    /// Arguments verified and dispatched (without identity)
    pub arguments: Arguments,

    /// Short SHA-256 of the arguments
    pub args_hash: String,

    /// Decision returned by the authority, if verification ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PolicyDecision>,

    /// What happened
    pub disposition: AttemptDisposition,

    /// Error text for failed attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Backoff slept after this attempt
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
}

impl AttemptRecord {
    /// Start a record for a request
    pub fn started(request: &ToolCallRequest) -> Self {
        Self {
            index: request.attempt_count,
            arguments: request.arguments.clone(),
            args_hash: request.args_hash(),
            decision: None,
            disposition: AttemptDisposition::Interrupted,
            error: None,
            started_at: Utc::now(),
            backoff: None,
        }
    }

    pub(crate) fn with_disposition(mut self, disposition: AttemptDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub(crate) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Result of one `invoke` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was invoked (after alias resolution)
    pub tool_name: String,

    /// Terminal outcome
    pub outcome: Outcome,

    /// Every attempt, in order
    pub attempts: Vec<AttemptRecord>,
}

impl ToolResult {
    pub fn new(tool_name: impl Into<String>, outcome: Outcome, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            tool_name: tool_name.into(),
            outcome,
            attempts,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self.outcome {
            Outcome::Success { .. } => OutcomeKind::Success,
            Outcome::Denied { .. } => OutcomeKind::Denied,
            Outcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind() == OutcomeKind::Success
    }

    pub fn is_denied(&self) -> bool {
        self.kind() == OutcomeKind::Denied
    }

    pub fn is_failed(&self) -> bool {
        self.kind() == OutcomeKind::Failed
    }

    /// Tool output if successful
    pub fn output(&self) -> Option<&ToolOutput> {
        match &self.outcome {
            Outcome::Success { output } => Some(output),
            _ => None,
        }
    }

    /// Raw payload if successful
    pub fn payload(&self) -> Option<&Value> {
        self.output().map(|o| &o.raw)
    }

    /// Final denial decision
    pub fn denial(&self) -> Option<&PolicyDecision> {
        match &self.outcome {
            Outcome::Denied { decision, .. } => Some(decision),
            _ => None,
        }
    }

    /// Denial source
    pub fn denial_source(&self) -> Option<DenialSource> {
        match &self.outcome {
            Outcome::Denied { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Failure if failed
    pub fn error(&self) -> Option<&InvocationError> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Failure kind if failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(|e| e.kind)
    }

    /// Number of attempts made
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Arguments of the last attempt
    pub fn final_arguments(&self) -> Option<&Arguments> {
        self.attempts.last().map(|a| &a.arguments)
    }

    /// Decision ids issued by the authority, in order
    pub fn decision_ids(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter_map(|a| a.decision.as_ref())
            .map(|d| d.decision_id.as_str())
            .collect()
    }

    /// Render for an LLM tool-use loop
    pub fn to_model_text(&self) -> String {
        match &self.outcome {
            Outcome::Success { output } => output
                .first_text()
                .unwrap_or(EMPTY_SUCCESS_TEXT)
                .to_string(),
            Outcome::Denied { decision, .. } => {
                if decision.reasons.is_empty() {
                    "Policy denied".to_string()
                } else {
                    format!("Policy denied: {}", decision.reason_summary())
                }
            }
            Outcome::Failed { error } => format!("Error: {}", error.message),
        }
    }
}
