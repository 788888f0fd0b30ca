//! Calling agent identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default argument key the identity is attached under
pub const DEFAULT_IDENTITY_KEY: &str = "agent_id";

/// Opaque, stable identifier of the calling agent.
///
/// Cheap to clone; the underlying string is shared and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Create a new identity
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_clone_shares_value() {
        let id = Identity::new("ap_a2d10232c6534523812423eec8a1425c");
        let copy = id.clone();
        assert_eq!(id, copy);
        assert_eq!(copy.as_str(), "ap_a2d10232c6534523812423eec8a1425c");
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let id = Identity::from("agent_1");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("agent_1"));
    }

    #[test]
    fn test_identity_deserializes_from_string() {
        let id: Identity = serde_json::from_str("\"ap_finance_bot\"").unwrap();
        assert_eq!(id, Identity::new("ap_finance_bot"));
        assert!(serde_json::from_str::<Identity>("42").is_err());
    }
}
