//! Policy context construction
//!
//! A context is derived fresh for every attempt from the identity, a shallow
//! copy of the call arguments, and the defaults a per-tool enrichment rule
//! supplies for fields the authority expects but callers may omit.
//! Enrichment never overwrites a caller-supplied value.

use crate::error::{GatewayError, Result};
use crate::identity::{DEFAULT_IDENTITY_KEY, Identity};
use crate::request::Arguments;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Context handed to the policy authority
pub type PolicyContext = serde_json::Map<String, Value>;

/// Supplies default context fields for one tool
pub trait EnrichmentRule: Send + Sync {
    /// Default fields for these arguments; existing keys are kept
    fn defaults(&self, arguments: &Arguments) -> Arguments;
}

impl<F> EnrichmentRule for F
where
    F: Fn(&Arguments) -> Arguments + Send + Sync,
{
    fn defaults(&self, arguments: &Arguments) -> Arguments {
        self(arguments)
    }
}

/// Fixed set of default fields
#[derive(Debug, Clone, Default)]
pub struct StaticDefaults(Arguments);

impl StaticDefaults {
    pub fn new(defaults: Arguments) -> Self {
        Self(defaults)
    }
}

impl EnrichmentRule for StaticDefaults {
    fn defaults(&self, _arguments: &Arguments) -> Arguments {
        self.0.clone()
    }
}

/// Builds policy contexts from registered enrichment rules
#[derive(Clone)]
pub struct ContextBuilder {
    identity_key: String,
    rules: HashMap<String, Arc<dyn EnrichmentRule>>,
    strict: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<_> = self.rules.keys().collect();
        tools.sort();
        f.debug_struct("ContextBuilder")
            .field("identity_key", &self.identity_key)
            .field("rules", &tools)
            .field("strict", &self.strict)
            .finish()
    }
}

impl ContextBuilder {
    /// Create a builder with no rules (pass-through)
    pub fn new() -> Self {
        Self {
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            rules: HashMap::new(),
            strict: false,
        }
    }

    /// Create a builder with the built-in enrichment rules
    pub fn with_defaults() -> Self {
        let mut builder = Self::new();
        for (tool, defaults) in builtin_enrichment() {
            builder = builder.with_static_defaults(tool, defaults);
        }
        builder
    }

    /// Set the key the identity is stored under
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = key.into();
        self
    }

    /// Require a rule for every tool
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Register an enrichment rule for a tool
    pub fn with_rule(mut self, tool_name: impl Into<String>, rule: impl EnrichmentRule + 'static) -> Self {
        self.rules.insert(tool_name.into(), Arc::new(rule));
        self
    }

    /// Register fixed defaults for a tool
    pub fn with_static_defaults(self, tool_name: impl Into<String>, defaults: Arguments) -> Self {
        self.with_rule(tool_name, StaticDefaults::new(defaults))
    }

    /// Whether a rule exists for the tool
    pub fn has_rule(&self, tool_name: &str) -> bool {
        self.rules.contains_key(tool_name)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Build the policy context for one attempt
    pub fn build(
        &self,
        tool_name: &str,
        identity: &Identity,
        arguments: &Arguments,
    ) -> Result<PolicyContext> {
        let rule = self.rules.get(tool_name);
        if rule.is_none() && self.strict {
            return Err(GatewayError::UnknownEnrichmentRule(tool_name.to_string()));
        }

        let mut context = PolicyContext::new();
        context.insert(
            self.identity_key.clone(),
            Value::String(identity.as_str().to_string()),
        );
        for (key, value) in arguments {
            if key != &self.identity_key {
                context.insert(key.clone(), value.clone());
            }
        }

        if let Some(rule) = rule {
            for (key, value) in rule.defaults(arguments) {
                context.entry(key).or_insert(value);
            }
        }

        Ok(context)
    }
}

/// Built-in defaults for the standard tool set
pub fn builtin_enrichment() -> Vec<(&'static str, Arguments)> {
    vec![
        (
            "merge_pull_request",
            object(json!({"base_branch": "main", "pr_size_kb": 250})),
        ),
        (
            "process_refund",
            object(json!({"reason_code": "customer_request"})),
        ),
    ]
}

fn object(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Arguments::new(),
    }
}
