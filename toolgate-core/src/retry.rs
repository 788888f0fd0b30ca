//! Retry and argument adjustment planning
//!
//! Given a denial, the planner decides whether another attempt is allowed and
//! which arguments it should carry. Adjustment rules are pure functions keyed
//! by tool name. The default rule halves registered "reducible" numeric fields
//! with a floor of 1, so repeated denials shrink the request toward something
//! the authority may accept without ever looping at zero.
//!
//! Backoff is linear: `base * (attempt_index + 1)`. The loop is already
//! bounded by the attempt budget, so worst-case latency stays predictable.

use crate::decision::PolicyDecision;
use crate::options::InvokeOptions;
use crate::request::Arguments;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Built-in reducible fields per tool
pub const BUILTIN_REDUCIBLE_FIELDS: &[(&str, &[&str])] = &[
    ("process_refund", &["amount"]),
    ("export_customer_data", &["limit"]),
];

/// Output of retry planning
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    /// Whether another attempt should be made
    pub should_retry: bool,

    /// Arguments for the next attempt
    pub adjusted_arguments: Arguments,

    /// Delay before the next attempt
    pub backoff_delay: Duration,
}

impl RetryPlan {
    /// A plan that stops here
    pub fn stop(arguments: &Arguments) -> Self {
        Self {
            should_retry: false,
            adjusted_arguments: arguments.clone(),
            backoff_delay: Duration::ZERO,
        }
    }
}

/// Linear backoff for a 0-based attempt index
pub fn linear_backoff(base: Duration, attempt_index: u32) -> Duration {
    base.saturating_mul(attempt_index.saturating_add(1))
}

/// Rewrites arguments after a denial
pub trait AdjustmentRule: Send + Sync {
    /// Arguments for the next attempt
    fn adjust(&self, arguments: &Arguments, decision: &PolicyDecision) -> Arguments;
}

impl<F> AdjustmentRule for F
where
    F: Fn(&Arguments, &PolicyDecision) -> Arguments + Send + Sync,
{
    fn adjust(&self, arguments: &Arguments, decision: &PolicyDecision) -> Arguments {
        self(arguments, decision)
    }
}

/// Halves numeric fields, never going below 1
#[derive(Debug, Clone)]
pub struct HalveReducible {
    fields: Vec<String>,
}

impl HalveReducible {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl AdjustmentRule for HalveReducible {
    fn adjust(&self, arguments: &Arguments, _decision: &PolicyDecision) -> Arguments {
        let mut adjusted = arguments.clone();
        for field in &self.fields {
            if let Some(value) = adjusted.get_mut(field) {
                *value = halve_with_floor(value);
            }
        }
        adjusted
    }
}

/// Halve a numeric value with a floor of 1. Values at or below 1, and
/// non-numeric values, are returned unchanged.
pub fn halve_with_floor(value: &Value) -> Value {
    let Value::Number(n) = value else {
        return value.clone();
    };

    if let Some(v) = n.as_i64() {
        if v > 1 {
            return Value::Number(Number::from((v / 2).max(1)));
        }
    } else if let Some(v) = n.as_u64() {
        if v > 1 {
            return Value::Number(Number::from((v / 2).max(1)));
        }
    } else if let Some(v) = n.as_f64() {
        if v > 1.0 {
            if let Some(halved) = Number::from_f64((v / 2.0).max(1.0)) {
                return Value::Number(halved);
            }
        }
    }
    value.clone()
}

/// Plans retries from a registry of adjustment rules
#[derive(Clone, Default)]
pub struct RetryPlanner {
    rules: HashMap<String, Arc<dyn AdjustmentRule>>,
}

impl std::fmt::Debug for RetryPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<_> = self.rules.keys().collect();
        tools.sort();
        f.debug_struct("RetryPlanner").field("rules", &tools).finish()
    }
}

impl RetryPlanner {
    /// Planner with no adjustment rules (retries resend unchanged arguments)
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner with the built-in reducible fields
    pub fn with_defaults() -> Self {
        BUILTIN_REDUCIBLE_FIELDS
            .iter()
            .fold(Self::new(), |planner, (tool, fields)| {
                planner.with_reducible(*tool, fields.iter().copied())
            })
    }

    /// Register a custom rule for a tool
    pub fn with_rule(mut self, tool_name: impl Into<String>, rule: impl AdjustmentRule + 'static) -> Self {
        self.rules.insert(tool_name.into(), Arc::new(rule));
        self
    }

    /// Register reducible fields for a tool (default halving rule)
    pub fn with_reducible<S: Into<String>>(
        self,
        tool_name: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.with_rule(tool_name, HalveReducible::new(fields))
    }

    pub fn has_rule(&self, tool_name: &str) -> bool {
        self.rules.contains_key(tool_name)
    }

    /// Plan the step after a denial at `attempt_index`.
    ///
    /// Retries only when the caller opted into adjustment retries and the
    /// attempt budget has room for another attempt.
    pub fn plan(
        &self,
        tool_name: &str,
        current_arguments: &Arguments,
        decision: &PolicyDecision,
        attempt_index: u32,
        options: &InvokeOptions,
    ) -> RetryPlan {
        let has_budget = attempt_index.saturating_add(1) < options.attempt_budget();
        if decision.allow || !options.allow_retry_on_denial || !has_budget {
            return RetryPlan::stop(current_arguments);
        }

        let adjusted_arguments = match self.rules.get(tool_name) {
            Some(rule) => rule.adjust(current_arguments, decision),
            None => current_arguments.clone(),
        };

        RetryPlan {
            should_retry: true,
            adjusted_arguments,
            backoff_delay: linear_backoff(options.backoff_base, attempt_index),
        }
    }

    /// Plan the step after a transient failure: identical arguments, same
    /// backoff schedule.
    pub fn plan_resend(
        &self,
        current_arguments: &Arguments,
        attempt_index: u32,
        options: &InvokeOptions,
    ) -> RetryPlan {
        if attempt_index.saturating_add(1) >= options.attempt_budget() {
            return RetryPlan::stop(current_arguments);
        }
        RetryPlan {
            should_retry: true,
            adjusted_arguments: current_arguments.clone(),
            backoff_delay: linear_backoff(options.backoff_base, attempt_index),
        }
    }
}
