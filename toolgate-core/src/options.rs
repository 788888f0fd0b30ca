//! Per-invocation options

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default attempt budget per invocation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default linear backoff base
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Configured defaults for [`InvokeOptions`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeDefaults {
    /// Attempt budget (>= 1)
    pub max_attempts: u32,

    /// Retry denials with adjusted arguments
    pub allow_retry_on_denial: bool,

    /// Base delay for linear backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Dispatch without a policy decision (never the default)
    pub skip_verification: bool,

    /// Deadline for the whole invocation across all attempts
    #[serde(with = "humantime_serde")]
    pub overall_timeout: Option<Duration>,
}

impl Default for InvokeDefaults {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            allow_retry_on_denial: false,
            backoff_base: DEFAULT_BACKOFF_BASE,
            skip_verification: false,
            overall_timeout: None,
        }
    }
}

/// Options for a single `invoke` call
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Attempt budget (values below 1 are treated as 1)
    pub max_attempts: u32,

    /// Retry denials with adjusted arguments
    pub allow_retry_on_denial: bool,

    /// Base delay for linear backoff
    pub backoff_base: Duration,

    /// Dispatch without a policy decision
    pub skip_verification: bool,

    /// Deadline for the whole invocation
    pub overall_timeout: Option<Duration>,

    /// Cancellation token observed at every suspension point
    pub cancellation: Option<CancellationToken>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self::from(&InvokeDefaults::default())
    }
}

impl From<&InvokeDefaults> for InvokeOptions {
    fn from(defaults: &InvokeDefaults) -> Self {
        Self {
            max_attempts: defaults.max_attempts,
            allow_retry_on_denial: defaults.allow_retry_on_denial,
            backoff_base: defaults.backoff_base,
            skip_verification: defaults.skip_verification,
            overall_timeout: defaults.overall_timeout,
            cancellation: None,
        }
    }
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Enable or disable adjustment retries on denial
    pub fn with_retry_on_denial(mut self, allow: bool) -> Self {
        self.allow_retry_on_denial = allow;
        self
    }

    /// Set the backoff base
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Bypass verification
    pub fn with_skip_verification(mut self, skip: bool) -> Self {
        self.skip_verification = skip;
        self
    }

    /// Bound the whole invocation
    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Effective attempt budget
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}
