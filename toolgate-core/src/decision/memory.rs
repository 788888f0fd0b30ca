//! In-memory decision client for deterministic testing
//!
//! Evaluates per-policy rules locally, records every verification it receives
//! and can simulate an unreachable or hanging authority.

use super::{DecisionClient, DecisionError, DenialReason, PolicyDecision};
use crate::context::PolicyContext;
use crate::identity::Identity;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Rule evaluated against the policy context.
///
/// Returns `Ok(())` to allow, or the denial reasons.
pub type DecisionRule =
    Arc<dyn Fn(&PolicyContext) -> Result<(), Vec<DenialReason>> + Send + Sync>;

/// A verification the client received
#[derive(Debug, Clone)]
pub struct RecordedVerification {
    pub identity: Identity,
    pub policy_id: String,
    pub context: PolicyContext,
    /// Outcome returned to the caller
    pub result: Result<PolicyDecision, DecisionError>,
}

/// Decision client backed by local rules
pub struct InMemoryDecisionClient {
    rules: HashMap<String, DecisionRule>,
    default_allow: bool,
    invalid_policies: HashSet<String>,
    scripted_failures: RwLock<VecDeque<DecisionError>>,
    delay: Option<Duration>,
    hang: bool,
    call_count: AtomicUsize,
    calls: RwLock<Vec<RecordedVerification>>,
}

impl Default for InMemoryDecisionClient {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl InMemoryDecisionClient {
    fn with_default(default_allow: bool) -> Self {
        Self {
            rules: HashMap::new(),
            default_allow,
            invalid_policies: HashSet::new(),
            scripted_failures: RwLock::new(VecDeque::new()),
            delay: None,
            hang: false,
            call_count: AtomicUsize::new(0),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Allow every policy without a rule
    pub fn allow_all() -> Self {
        Self::with_default(true)
    }

    /// Deny every policy without a rule
    pub fn deny_all() -> Self {
        Self::with_default(false)
    }

    /// Register a rule for a policy id
    pub fn with_rule<F>(mut self, policy_id: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&PolicyContext) -> Result<(), Vec<DenialReason>> + Send + Sync + 'static,
    {
        self.rules.insert(policy_id.into(), Arc::new(rule));
        self
    }

    /// Deny when a numeric context field exceeds `limit`
    pub fn deny_above(self, policy_id: impl Into<String>, field: impl Into<String>, limit: f64) -> Self {
        let field = field.into();
        self.with_rule(policy_id, move |context| {
            match context.get(&field).and_then(|v| v.as_f64()) {
                Some(value) if value > limit => Err(vec![DenialReason::new(
                    "limit_exceeded",
                    format!("{} {} exceeds limit {}", field, value, limit),
                )]),
                _ => Ok(()),
            }
        })
    }

    /// Treat a policy id as unknown to the authority
    pub fn with_invalid_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.invalid_policies.insert(policy_id.into());
        self
    }

    /// Fail the next verifications with these errors, in order
    pub fn with_failures(self, failures: impl IntoIterator<Item = DecisionError>) -> Self {
        Self {
            scripted_failures: RwLock::new(failures.into_iter().collect()),
            ..self
        }
    }

    /// Simulate network latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never answer
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Number of verify calls received
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All verifications received so far
    pub async fn calls(&self) -> Vec<RecordedVerification> {
        self.calls.read().await.clone()
    }

    fn evaluate(&self, policy_id: &str, context: &PolicyContext) -> Result<PolicyDecision, DecisionError> {
        if self.invalid_policies.contains(policy_id) {
            return Err(DecisionError::InvalidPolicyId(policy_id.to_string()));
        }

        let decision_id = format!("dec_{}", uuid::Uuid::new_v4().simple());
        let verdict = match self.rules.get(policy_id) {
            Some(rule) => rule(context),
            None if self.default_allow => Ok(()),
            None => Err(vec![DenialReason::new(
                "no_rule",
                format!("No allow rule for {}", policy_id),
            )]),
        };

        Ok(match verdict {
            Ok(()) => PolicyDecision::allow(decision_id),
            Err(reasons) => PolicyDecision::deny(decision_id, reasons),
        })
    }
}

#[async_trait]
impl DecisionClient for InMemoryDecisionClient {
    async fn verify(
        &self,
        identity: &Identity,
        policy_id: &str,
        context: &PolicyContext,
    ) -> Result<PolicyDecision, DecisionError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripted_failures.write().await.pop_front();
        let result = match scripted {
            Some(error) => Err(error),
            None => self.evaluate(policy_id, context),
        };

        self.calls.write().await.push(RecordedVerification {
            identity: identity.clone(),
            policy_id: policy_id.to_string(),
            context: context.clone(),
            result: result.clone(),
        });

        result
    }
}
