//! Error types for gateway operations

use crate::decision::DecisionError;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types for the tool gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Tool has no registered policy
    #[error("No policy mapping found for tool: {tool}. Available tools: {available}")]
    UnmappedTool {
        /// Requested tool name
        tool: String,
        /// Comma-separated list of mapped tools
        available: String,
    },

    /// Policy authority rejected the policy id
    #[error("Invalid policy id: {0}")]
    InvalidPolicyId(String),

    /// Strict enrichment is on and the tool has no rule
    #[error("No enrichment rule registered for tool: {0}")]
    UnknownEnrichmentRule(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// MCP client error
    #[error("MCP error: {0}")]
    Mcp(#[from] crate::mcp::McpError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Whether this is a permanent configuration error (never retried)
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GatewayError::UnmappedTool { .. }
                | GatewayError::InvalidPolicyId(_)
                | GatewayError::UnknownEnrichmentRule(_)
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UnmappedTool { .. } => "UNMAPPED_TOOL",
            GatewayError::InvalidPolicyId(_) => "INVALID_POLICY_ID",
            GatewayError::UnknownEnrichmentRule(_) => "UNKNOWN_ENRICHMENT_RULE",
            GatewayError::Configuration(_) => "CONFIGURATION",
            GatewayError::Serialization(_) => "SERIALIZATION",
            GatewayError::Io(_) => "IO",
            GatewayError::Mcp(_) => "MCP",
            GatewayError::Other(_) => "OTHER",
        }
    }
}

impl From<DecisionError> for GatewayError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::InvalidPolicyId(id) => GatewayError::InvalidPolicyId(id),
            other => GatewayError::Other(other.to_string()),
        }
    }
}

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        let unmapped = GatewayError::UnmappedTool {
            tool: "nonexistent_tool".to_string(),
            available: "process_refund".to_string(),
        };
        assert!(unmapped.is_permanent());
        assert!(GatewayError::InvalidPolicyId("x".into()).is_permanent());
        assert!(GatewayError::UnknownEnrichmentRule("x".into()).is_permanent());
        assert!(!GatewayError::Configuration("bad".into()).is_permanent());
        assert!(!GatewayError::from("boom").is_permanent());
    }

    #[test]
    fn test_decision_error_conversion() {
        let err = GatewayError::from(DecisionError::InvalidPolicyId("bogus.v1".into()));
        assert!(err.is_permanent());
        assert_eq!(err.code(), "INVALID_POLICY_ID");
        assert_eq!(err.to_string(), "Invalid policy id: bogus.v1");

        let err = GatewayError::from(DecisionError::AuthorityUnreachable("down".into()));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_unmapped_message_lists_tools() {
        let err = GatewayError::UnmappedTool {
            tool: "nonexistent_tool".to_string(),
            available: "merge_pull_request, process_refund".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nonexistent_tool"));
        assert!(msg.contains("Available tools: merge_pull_request, process_refund"));
        assert_eq!(err.code(), "UNMAPPED_TOOL");
    }
}
