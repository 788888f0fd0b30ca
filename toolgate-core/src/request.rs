//! Tool call requests
//!
//! A request is immutable once built. Retries never edit arguments in place;
//! they derive a fresh request for the next attempt so every attempt can be
//! audited with the exact arguments it carried.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Ordered mapping of argument name to value
pub type Arguments = serde_json::Map<String, Value>;

/// Convert a JSON value into call arguments.
///
/// `null` becomes an empty argument map; any other non-object is rejected.
pub fn into_arguments(value: Value) -> Result<Arguments> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Arguments::new()),
        other => Err(GatewayError::Other(format!(
            "Tool arguments must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compute the short SHA-256 hash of an argument map (for provenance)
pub fn args_hash(arguments: &Arguments) -> String {
    let args_json = serde_json::to_string(arguments).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(args_json.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// A single tool invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Tool to invoke
    pub tool_name: String,

    /// Call arguments (without the identity key)
    pub arguments: Arguments,

    /// Number of attempts made before this one
    pub attempt_count: u32,
}

impl ToolCallRequest {
    /// Create the first-attempt request
    pub fn new(tool_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            attempt_count: 0,
        }
    }

    /// Derive the next attempt with adjusted arguments
    pub fn next_attempt(&self, arguments: Arguments) -> Self {
        Self {
            tool_name: self.tool_name.clone(),
            arguments,
            attempt_count: self.attempt_count + 1,
        }
    }

    /// Derive the next attempt with identical arguments
    pub fn resend(&self) -> Self {
        self.next_attempt(self.arguments.clone())
    }

    /// Short hash of the arguments
    pub fn args_hash(&self) -> String {
        args_hash(&self.arguments)
    }

    /// Arguments with the identity attached under the reserved key.
    ///
    /// The gateway identity always wins over a caller-supplied value.
    pub fn outbound_arguments(&self, identity_key: &str, identity: &str) -> Arguments {
        let mut outbound = self.arguments.clone();
        outbound.insert(identity_key.to_string(), Value::String(identity.to_string()));
        outbound
    }
}
