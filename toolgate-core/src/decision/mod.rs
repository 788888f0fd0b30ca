//! Policy decision client boundary
//!
//! The policy authority is an external collaborator: it receives an
//! `(identity, policy_id, context)` triple and answers with an allow/deny
//! verdict plus structured reasons. Every call may have side effects at the
//! authority (audit logging), so callers must never cache or deduplicate
//! decisions.

pub mod memory;

use crate::context::PolicyContext;
use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{DecisionRule, InMemoryDecisionClient, RecordedVerification};

/// Reason code used when a denial arrives without any reasons
pub const UNSPECIFIED_DENIAL_CODE: &str = "policy_denied";

/// Structured reason attached to a denial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialReason {
    /// Machine-readable reason code
    pub code: String,

    /// Human-readable explanation
    pub message: String,
}

impl DenialReason {
    /// Create a new reason
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Allow/deny verdict for a single evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Unique id of this evaluation
    pub decision_id: String,

    /// Whether the action is allowed
    pub allow: bool,

    /// Denial reasons (empty iff `allow`)
    #[serde(default)]
    pub reasons: Vec<DenialReason>,
}

impl PolicyDecision {
    /// Create an allow decision
    pub fn allow(decision_id: impl Into<String>) -> Self {
        Self {
            decision_id: decision_id.into(),
            allow: true,
            reasons: Vec::new(),
        }
    }

    /// Create a deny decision
    pub fn deny(decision_id: impl Into<String>, reasons: Vec<DenialReason>) -> Self {
        Self {
            decision_id: decision_id.into(),
            allow: false,
            reasons,
        }
        .normalize()
    }

    /// Enforce the reasons/allow invariant on decisions from the authority.
    ///
    /// Allow decisions drop any reasons; deny decisions without reasons get a
    /// single unspecified reason.
    pub fn normalize(mut self) -> Self {
        if self.allow {
            self.reasons.clear();
        } else if self.reasons.is_empty() {
            self.reasons
                .push(DenialReason::new(UNSPECIFIED_DENIAL_CODE, "Policy denied"));
        }
        self
    }

    /// Reason messages joined for display
    pub fn reason_summary(&self) -> String {
        if self.reasons.is_empty() {
            return "Policy denied".to_string();
        }
        self.reasons
            .iter()
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Errors from the policy authority
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    /// Authority could not be reached (transient, retryable)
    #[error("Policy authority unreachable: {0}")]
    AuthorityUnreachable(String),

    /// Authority does not know the policy id (permanent)
    #[error("Invalid policy id: {0}")]
    InvalidPolicyId(String),
}

impl DecisionError {
    /// Whether the gateway may retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, DecisionError::AuthorityUnreachable(_))
    }
}

/// Client for the external policy authority
#[async_trait]
pub trait DecisionClient: Send + Sync {
    /// Request a decision for `identity` acting under `policy_id`.
    ///
    /// May suspend on network I/O; the gateway bounds it with its own timeout.
    async fn verify(
        &self,
        identity: &Identity,
        policy_id: &str,
        context: &PolicyContext,
    ) -> Result<PolicyDecision, DecisionError>;
}
