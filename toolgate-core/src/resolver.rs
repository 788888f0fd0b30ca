//! Tool-to-policy resolution
//!
//! A static lookup from tool name to policy id. A tool without a mapping is a
//! permanent configuration error: it is never retried and never executed.

use crate::error::{GatewayError, Result};
use std::collections::HashMap;

/// Built-in tool to policy table
pub const BUILTIN_TOOL_POLICIES: &[(&str, &str)] = &[
    ("merge_pull_request", "code.repository.merge.v1"),
    ("process_refund", "finance.payment.refund.v1"),
    ("export_customer_data", "data.export.create.v1"),
    ("publish_release", "code.release.publish.v1"),
    ("send_message", "messaging.message.send.v1"),
    ("execute_transaction", "finance.transaction.execute.v1"),
    ("access_data", "governance.data.access.v1"),
    ("crypto_trade", "finance.crypto.trade.v1"),
    ("ingest_report", "data.report.ingest.v1"),
    ("review_contract", "legal.contract.review.v1"),
];

/// Maps tool names to policy ids
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    policies: HashMap<String, String>,
}

impl PolicyResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver with the built-in table
    pub fn with_defaults() -> Self {
        Self::from_pairs(BUILTIN_TOOL_POLICIES.iter().copied())
    }

    /// Create a resolver from `(tool, policy_id)` pairs
    pub fn from_pairs<T, P>(pairs: impl IntoIterator<Item = (T, P)>) -> Self
    where
        T: Into<String>,
        P: Into<String>,
    {
        Self {
            policies: pairs
                .into_iter()
                .map(|(tool, policy)| (tool.into(), policy.into()))
                .collect(),
        }
    }

    /// Add or replace a mapping
    pub fn with_mapping(mut self, tool_name: impl Into<String>, policy_id: impl Into<String>) -> Self {
        self.policies.insert(tool_name.into(), policy_id.into());
        self
    }

    /// Resolve the policy id for a tool
    pub fn resolve(&self, tool_name: &str) -> Result<&str> {
        self.policies
            .get(tool_name)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnmappedTool {
                tool: tool_name.to_string(),
                available: self.tool_names().join(", "),
            })
    }

    /// Mapped tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Maps model-facing tool names to executor tool names
#[derive(Debug, Clone, Default)]
pub struct ToolAliases {
    aliases: HashMap<String, String>,
}

impl ToolAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias
    pub fn with_alias(mut self, alias: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), tool_name.into());
        self
    }

    /// Canonical tool name; unknown names pass through
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }
}

impl<A: Into<String>, T: Into<String>> FromIterator<(A, T)> for ToolAliases {
    fn from_iter<I: IntoIterator<Item = (A, T)>>(iter: I) -> Self {
        Self {
            aliases: iter.into_iter().map(|(a, t)| (a.into(), t.into())).collect(),
        }
    }
}
