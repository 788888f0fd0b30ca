//! Configuration types for the tool gateway

use crate::context::{ContextBuilder, builtin_enrichment};
use crate::error::{GatewayError, Result};
use crate::identity::DEFAULT_IDENTITY_KEY;
use crate::options::InvokeDefaults;
use crate::request::Arguments;
use crate::resolver::{BUILTIN_TOOL_POLICIES, PolicyResolver, ToolAliases};
use crate::retry::{BUILTIN_REDUCIBLE_FIELDS, RetryPlanner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default text marking a server-side denial in executor output
pub const DEFAULT_DENIAL_MARKER: &str = "Policy denied";

/// Main configuration for the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Identity the gateway acts as
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Reserved argument key carrying the identity
    pub identity_key: String,

    /// Fail tools that have no enrichment rule
    pub strict_enrichment: bool,

    /// Substring that marks a server-side denial in tool output
    pub denial_marker: String,

    /// Bound on a single policy decision request
    #[serde(with = "humantime_serde")]
    pub decision_timeout: Option<Duration>,

    /// Bound on a single executor call
    #[serde(with = "humantime_serde")]
    pub executor_timeout: Option<Duration>,

    /// Defaults for per-call options
    pub invoke: InvokeDefaults,

    /// Tool name to policy id
    pub tool_policies: BTreeMap<String, String>,

    /// Model-facing tool name to executor tool name
    pub aliases: BTreeMap<String, String>,

    /// Tool name to default context fields
    pub enrichment: BTreeMap<String, Arguments>,

    /// Tool name to numeric fields halved on denial
    pub reducible_fields: BTreeMap<String, Vec<String>>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            identity: None,
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            strict_enrichment: false,
            denial_marker: DEFAULT_DENIAL_MARKER.to_string(),
            decision_timeout: None,
            executor_timeout: None,
            invoke: InvokeDefaults::default(),
            tool_policies: BUILTIN_TOOL_POLICIES
                .iter()
                .map(|(tool, policy)| (tool.to_string(), policy.to_string()))
                .collect(),
            aliases: BTreeMap::new(),
            enrichment: builtin_enrichment()
                .into_iter()
                .map(|(tool, defaults)| (tool.to_string(), defaults))
                .collect(),
            reducible_fields: BUILTIN_REDUCIBLE_FIELDS
                .iter()
                .map(|(tool, fields)| {
                    (
                        tool.to_string(),
                        fields.iter().map(|f| f.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration (built-in tool table)
    /// 2. `toolgate.toml` in the working directory
    /// 3. `TOOLGATE_`-prefixed environment variables (`__` separates nested keys,
    ///    e.g. `TOOLGATE_INVOKE__MAX_ATTEMPTS=5`)
    /// 4. The file named by `TOOLGATE_CONFIG_PATH`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file("toolgate.toml"))
            .merge(Env::prefixed("TOOLGATE_").split("__"));

        if let Ok(path) = std::env::var("TOOLGATE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: GatewayConfig = figment.extract().map_err(|e| {
            GatewayError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(GatewayError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: GatewayConfig = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                GatewayError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.invoke.max_attempts == 0 {
            return Err(GatewayError::Configuration(
                "invoke.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.identity_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "identity_key must not be empty".to_string(),
            ));
        }

        if self.denial_marker.is_empty() {
            return Err(GatewayError::Configuration(
                "denial_marker must not be empty".to_string(),
            ));
        }

        if let Some((tool, _)) = self
            .tool_policies
            .iter()
            .find(|(_, policy)| policy.trim().is_empty())
        {
            return Err(GatewayError::Configuration(format!(
                "Empty policy id for tool: {}",
                tool
            )));
        }

        if let Some(identity) = &self.identity
            && identity.trim().is_empty()
        {
            return Err(GatewayError::Configuration(
                "identity must not be empty when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolver over the configured tool table
    pub fn resolver(&self) -> PolicyResolver {
        PolicyResolver::from_pairs(
            self.tool_policies
                .iter()
                .map(|(tool, policy)| (tool.as_str(), policy.as_str())),
        )
    }

    /// Context builder with the configured enrichment defaults
    pub fn context_builder(&self) -> ContextBuilder {
        self.enrichment.iter().fold(
            ContextBuilder::new()
                .with_identity_key(self.identity_key.clone())
                .with_strict(self.strict_enrichment),
            |builder, (tool, defaults)| builder.with_static_defaults(tool.clone(), defaults.clone()),
        )
    }

    /// Retry planner with the configured reducible fields
    pub fn retry_planner(&self) -> RetryPlanner {
        self.reducible_fields
            .iter()
            .fold(RetryPlanner::new(), |planner, (tool, fields)| {
                planner.with_reducible(tool.clone(), fields.iter().cloned())
            })
    }

    /// Configured tool aliases
    pub fn tool_aliases(&self) -> ToolAliases {
        self.aliases
            .iter()
            .map(|(alias, tool)| (alias.clone(), tool.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use serde_json::json;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identity_key, "agent_id");
        assert_eq!(config.denial_marker, "Policy denied");
        assert_eq!(config.tool_policies.len(), 10);
        assert_eq!(config.invoke.max_attempts, 3);
        assert_eq!(config.reducible_fields["process_refund"], vec!["amount"]);
    }

    #[test]
    fn test_from_file_extends_defaults() {
        let file = write_config(
            r#"
identity = "ap_finance_bot"
decision_timeout = "2s"

[invoke]
max_attempts = 5
allow_retry_on_denial = true
backoff_base = "250ms"

[tool_policies]
wire_funds = "finance.wire.send.v1"

[aliases]
refund = "process_refund"

[enrichment.wire_funds]
currency = "USD"

[reducible_fields]
wire_funds = ["amount"]
"#,
        );

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.identity.as_deref(), Some("ap_finance_bot"));
        assert_eq!(config.decision_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.invoke.max_attempts, 5);
        assert!(config.invoke.allow_retry_on_denial);
        assert_eq!(config.invoke.backoff_base, Duration::from_millis(250));

        let resolver = config.resolver();
        assert_eq!(resolver.resolve("wire_funds").unwrap(), "finance.wire.send.v1");
        assert_eq!(
            resolver.resolve("process_refund").unwrap(),
            "finance.payment.refund.v1"
        );
        assert_eq!(config.tool_aliases().canonical("refund"), "process_refund");
        assert!(config.retry_planner().has_rule("wire_funds"));
        assert!(config.retry_planner().has_rule("process_refund"));

        let context = config
            .context_builder()
            .build("wire_funds", &Identity::new("ap_finance_bot"), &Arguments::new())
            .unwrap();
        assert_eq!(context["currency"], json!("USD"));
        assert_eq!(context["agent_id"], json!("ap_finance_bot"));
    }

    #[test]
    fn test_from_file_rejects_zero_attempts() {
        let file = write_config("[invoke]\nmax_attempts = 0\n");
        let err = GatewayConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(ref m) if m.contains("max_attempts")));
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::from_file("/nonexistent/toolgate.toml").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GatewayConfig::default();
        config.identity_key = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.denial_marker.clear();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config
            .tool_policies
            .insert("send_message".to_string(), String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_identity_key_flows_to_context() {
        let file = write_config("identity_key = \"passport_id\"\nstrict_enrichment = true\n");
        let config = GatewayConfig::from_file(file.path()).unwrap();
        let builder = config.context_builder();
        assert_eq!(builder.identity_key(), "passport_id");
        assert!(builder.is_strict());
    }
}
