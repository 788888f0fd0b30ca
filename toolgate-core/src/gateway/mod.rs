//! Policy-gated tool invocation
//!
//! The [`Gateway`] sits between an agent's tool calls and the executor that
//! performs them. For every attempt it resolves the tool's policy, builds a
//! fresh policy context, asks the authority for a decision and only then
//! dispatches, with the gateway identity attached to the outbound arguments.
//!
//! Attempts are strictly sequential. A denial ends the call unless the caller
//! opted into adjustment retries; transient authority and executor failures
//! are resent unchanged on the same linear backoff schedule. The overall
//! deadline and the cancellation token are observed at every suspension point
//! (verification, execution, backoff), and nothing is dispatched once either
//! has fired.

mod result;


pub use result::{
    AttemptDisposition, AttemptRecord, DenialSource, EMPTY_SUCCESS_TEXT, FailureKind,
    InvocationError, Outcome, OutcomeKind, ToolResult,
};

use crate::config::{DEFAULT_DENIAL_MARKER, GatewayConfig};
use crate::context::{ContextBuilder, PolicyContext};
use crate::decision::{DecisionClient, DecisionError, DenialReason, PolicyDecision};
use crate::error::{GatewayError, Result};
use crate::executor::{ExecutorError, ToolExecutor, ToolOutput};
use crate::identity::Identity;
use crate::options::{InvokeDefaults, InvokeOptions};
use crate::request::{Arguments, ToolCallRequest, into_arguments};
use crate::resolver::{PolicyResolver, ToolAliases};
use crate::retry::RetryPlanner;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Reason code for denials reported by the executor
pub const SERVER_DENIAL_CODE: &str = "server_denied";

/// Policy-gated tool gateway
#[derive(Clone)]
pub struct Gateway {
    identity: Identity,
    decision_client: Arc<dyn DecisionClient>,
    executor: Arc<dyn ToolExecutor>,
    resolver: PolicyResolver,
    context_builder: ContextBuilder,
    planner: RetryPlanner,
    aliases: ToolAliases,
    denial_marker: String,
    decision_timeout: Option<Duration>,
    executor_timeout: Option<Duration>,
    defaults: InvokeDefaults,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("identity", &self.identity)
            .field("resolver", &self.resolver)
            .field("context_builder", &self.context_builder)
            .field("planner", &self.planner)
            .field("denial_marker", &self.denial_marker)
            .field("decision_timeout", &self.decision_timeout)
            .field("executor_timeout", &self.executor_timeout)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    identity: Identity,
    decision_client: Arc<dyn DecisionClient>,
    executor: Arc<dyn ToolExecutor>,
    resolver: PolicyResolver,
    context_builder: ContextBuilder,
    planner: RetryPlanner,
    aliases: ToolAliases,
    identity_key: Option<String>,
    denial_marker: String,
    decision_timeout: Option<Duration>,
    executor_timeout: Option<Duration>,
    defaults: InvokeDefaults,
}

impl GatewayBuilder {
    /// Start from the built-in tool table, enrichment and reducible fields
    pub fn new(
        identity: impl Into<Identity>,
        decision_client: Arc<dyn DecisionClient>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            identity: identity.into(),
            decision_client,
            executor,
            resolver: PolicyResolver::with_defaults(),
            context_builder: ContextBuilder::with_defaults(),
            planner: RetryPlanner::with_defaults(),
            aliases: ToolAliases::new(),
            identity_key: None,
            denial_marker: DEFAULT_DENIAL_MARKER.to_string(),
            decision_timeout: None,
            executor_timeout: None,
            defaults: InvokeDefaults::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: PolicyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn with_retry_planner(mut self, planner: RetryPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_aliases(mut self, aliases: ToolAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Reserved argument key for the identity (applies to context and dispatch)
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = Some(key.into());
        self
    }

    /// Text that marks a server-side denial in tool output
    pub fn with_denial_marker(mut self, marker: impl Into<String>) -> Self {
        self.denial_marker = marker.into();
        self
    }

    /// Bound each policy decision request
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = Some(timeout);
        self
    }

    /// Bound each executor call
    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = Some(timeout);
        self
    }

    /// Defaults used by [`Gateway::call`]
    pub fn with_invoke_defaults(mut self, defaults: InvokeDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway> {
        if self.identity.as_str().trim().is_empty() {
            return Err(GatewayError::Configuration(
                "Gateway identity must not be empty".to_string(),
            ));
        }
        if self.denial_marker.is_empty() {
            return Err(GatewayError::Configuration(
                "denial_marker must not be empty".to_string(),
            ));
        }

        let context_builder = match self.identity_key {
            Some(key) if key.trim().is_empty() => {
                return Err(GatewayError::Configuration(
                    "identity_key must not be empty".to_string(),
                ));
            }
            Some(key) => self.context_builder.with_identity_key(key),
            None => self.context_builder,
        };

        tracing::debug!(
            identity = %self.identity,
            tools = self.resolver.len(),
            identity_key = %context_builder.identity_key(),
            "Gateway built"
        );

        Ok(Gateway {
            identity: self.identity,
            decision_client: self.decision_client,
            executor: self.executor,
            resolver: self.resolver,
            context_builder,
            planner: self.planner,
            aliases: self.aliases,
            denial_marker: self.denial_marker,
            decision_timeout: self.decision_timeout,
            executor_timeout: self.executor_timeout,
            defaults: self.defaults,
        })
    }
}

impl Gateway {
    /// Create a builder
    pub fn builder(
        identity: impl Into<Identity>,
        decision_client: Arc<dyn DecisionClient>,
        executor: Arc<dyn ToolExecutor>,
    ) -> GatewayBuilder {
        GatewayBuilder::new(identity, decision_client, executor)
    }

    /// Build a gateway from configuration
    pub fn from_config(
        config: &GatewayConfig,
        decision_client: Arc<dyn DecisionClient>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = config.identity.clone().ok_or_else(|| {
            GatewayError::Configuration("identity is required to build a gateway".to_string())
        })?;

        let mut builder = GatewayBuilder::new(identity, decision_client, executor)
            .with_resolver(config.resolver())
            .with_context_builder(config.context_builder())
            .with_retry_planner(config.retry_planner())
            .with_aliases(config.tool_aliases())
            .with_identity_key(config.identity_key.clone())
            .with_denial_marker(config.denial_marker.clone())
            .with_invoke_defaults(config.invoke.clone());

        if let Some(timeout) = config.decision_timeout {
            builder = builder.with_decision_timeout(timeout);
        }
        if let Some(timeout) = config.executor_timeout {
            builder = builder.with_executor_timeout(timeout);
        }
        builder.build()
    }

    /// Identity this gateway acts as
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Reserved argument key carrying the identity
    pub fn identity_key(&self) -> &str {
        self.context_builder.identity_key()
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Options seeded from the configured defaults
    pub fn default_options(&self) -> InvokeOptions {
        InvokeOptions::from(&self.defaults)
    }

    /// Invoke with the configured default options
    pub async fn call(&self, tool_name: &str, arguments: Arguments) -> ToolResult {
        self.invoke(tool_name, arguments, self.default_options()).await
    }

    /// Invoke with arguments given as a JSON value (as received from a model)
    pub async fn invoke_json(&self, tool_name: &str, arguments: Value, options: InvokeOptions) -> ToolResult {
        match into_arguments(arguments) {
            Ok(arguments) => self.invoke(tool_name, arguments, options).await,
            Err(err) => {
                let tool_name = self.aliases.canonical(tool_name).to_string();
                tracing::warn!(tool = %tool_name, error = %err, "Rejected malformed tool arguments");
                ToolResult::new(
                    tool_name,
                    Outcome::Failed {
                        error: InvocationError::new(FailureKind::PermanentConfig, err.to_string())
                            .with_code("INVALID_ARGUMENTS"),
                    },
                    Vec::new(),
                )
            }
        }
    }

    /// Invoke a tool through the policy gate
    pub async fn invoke(&self, tool_name: &str, arguments: Arguments, options: InvokeOptions) -> ToolResult {
        let tool_name = self.aliases.canonical(tool_name).to_string();
        let span = tracing::info_span!("invoke", tool = %tool_name, identity = %self.identity);
        self.run(tool_name, arguments, options).instrument(span).await
    }

    async fn run(&self, tool_name: String, arguments: Arguments, options: InvokeOptions) -> ToolResult {
        let max_attempts = options.attempt_budget();
        let guard = Guard::new(&options);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut request = ToolCallRequest::new(tool_name.as_str(), arguments);

        if options.skip_verification {
            tracing::warn!("Policy verification bypassed for this invocation");
        }

        let outcome = loop {
            if let Err(interrupt) = guard.check() {
                break Outcome::Failed {
                    error: interrupt.into_error(&options),
                };
            }

            let (mut record, step) = self.attempt(&request, &options, &guard).await;
            let index = request.attempt_count;

            let (plan, carried) = match step {
                AttemptStep::Success(output) => {
                    attempts.push(record);
                    break Outcome::Success { output };
                }
                AttemptStep::Fatal(error) => {
                    attempts.push(record);
                    break Outcome::Failed { error };
                }
                AttemptStep::Denied(decision, source) => {
                    let plan = self.planner.plan(
                        &tool_name,
                        &request.arguments,
                        &decision,
                        index,
                        &options,
                    );
                    if !plan.should_retry {
                        attempts.push(record);
                        break Outcome::Denied { decision, source };
                    }
                    tracing::warn!(
                        attempt = index + 1,
                        max_attempts,
                        decision_id = %decision.decision_id,
                        reasons = %decision.reason_summary(),
                        "Denied, retrying with adjusted arguments"
                    );
                    (plan, Carried::Adjusted)
                }
                AttemptStep::Transient(error) => {
                    let plan = self.planner.plan_resend(&request.arguments, index, &options);
                    if !plan.should_retry {
                        attempts.push(record);
                        break Outcome::Failed { error };
                    }
                    tracing::warn!(
                        attempt = index + 1,
                        max_attempts,
                        error = %error.message,
                        "Transient failure, retrying"
                    );
                    (plan, Carried::Resend)
                }
            };

            record.backoff = Some(plan.backoff_delay);
            attempts.push(record);

            if let Err(interrupt) = guard.run(tokio::time::sleep(plan.backoff_delay)).await {
                break Outcome::Failed {
                    error: interrupt.into_error(&options),
                };
            }

            request = match carried {
                Carried::Adjusted => request.next_attempt(plan.adjusted_arguments),
                Carried::Resend => request.resend(),
            };
        };

        let result = ToolResult::new(tool_name, outcome, attempts);
        match &result.outcome {
            Outcome::Success { .. } => tracing::info!(
                attempts = result.attempt_count(),
                "Tool call succeeded"
            ),
            Outcome::Denied { decision, source } => tracing::info!(
                attempts = result.attempt_count(),
                decision_id = %decision.decision_id,
                source = ?source,
                reasons = %decision.reason_summary(),
                "Tool call denied"
            ),
            Outcome::Failed { error } => tracing::info!(
                attempts = result.attempt_count(),
                kind = ?error.kind,
                error = %error.message,
                "Tool call failed"
            ),
        }
        result
    }

    /// One verify-then-dispatch attempt
    async fn attempt(
        &self,
        request: &ToolCallRequest,
        options: &InvokeOptions,
        guard: &Guard<'_>,
    ) -> (AttemptRecord, AttemptStep) {
        let mut record = AttemptRecord::started(request);
        if options.skip_verification {
            return self.dispatch(request, record, None, options, guard).await;
        }

        let tool_name = request.tool_name.as_str();
        let attempt = request.attempt_count;

        let policy_id = match self.resolver.resolve(tool_name) {
            Ok(policy_id) => policy_id,
            Err(err) => return rejected(record, &err),
        };
        let context = match self
            .context_builder
            .build(tool_name, &self.identity, &request.arguments)
        {
            Ok(context) => context,
            Err(err) => return rejected(record, &err),
        };

        tracing::debug!(policy_id = %policy_id, attempt, "Verifying policy decision");

        let decision = match guard.run(self.verify(policy_id, &context)).await {
            Err(interrupt) => {
                return (record, AttemptStep::Fatal(interrupt.into_error(options)));
            }
            Ok(Err(err)) if !err.is_transient() => {
                return rejected(record, &GatewayError::from(err));
            }
            Ok(Err(err)) => {
                return (
                    record
                        .with_disposition(AttemptDisposition::AuthorityError)
                        .with_error(err.to_string()),
                    AttemptStep::Transient(InvocationError::authority(&err)),
                );
            }
            Ok(Ok(decision)) => decision.normalize(),
        };

        record.decision = Some(decision.clone());
        if !decision.allow {
            tracing::debug!(decision_id = %decision.decision_id, attempt, "Policy denied");
            return (
                record.with_disposition(AttemptDisposition::Denied),
                AttemptStep::Denied(decision, DenialSource::Authority),
            );
        }

        tracing::debug!(decision_id = %decision.decision_id, attempt, "Policy allowed");
        self.dispatch(request, record, Some(decision), options, guard).await
    }

    async fn dispatch(
        &self,
        request: &ToolCallRequest,
        record: AttemptRecord,
        allow: Option<PolicyDecision>,
        options: &InvokeOptions,
        guard: &Guard<'_>,
    ) -> (AttemptRecord, AttemptStep) {
        if let Err(interrupt) = guard.check() {
            return (record, AttemptStep::Fatal(interrupt.into_error(options)));
        }

        let outbound = request.outbound_arguments(self.identity_key(), self.identity.as_str());
        tracing::debug!(
            attempt = request.attempt_count,
            args_hash = %record.args_hash,
            "Dispatching tool call"
        );

        let output = match guard.run(self.execute(&request.tool_name, outbound)).await {
            Err(interrupt) => {
                return (record, AttemptStep::Fatal(interrupt.into_error(options)));
            }
            Ok(Err(err)) => {
                return (
                    record
                        .with_disposition(AttemptDisposition::ExecutorError)
                        .with_error(err.to_string()),
                    AttemptStep::Transient(InvocationError::executor(&err)),
                );
            }
            Ok(Ok(output)) => output,
        };

        if let Some(text) = output.marker_text(&self.denial_marker) {
            let decision = self.server_denial(allow.as_ref(), text);
            tracing::warn!(
                decision_id = %decision.decision_id,
                reasons = %decision.reason_summary(),
                "Executor denied after client-side allow"
            );
            return (
                record.with_disposition(AttemptDisposition::ServerDenied),
                AttemptStep::Denied(decision, DenialSource::Server),
            );
        }

        if output.is_error {
            let message = output
                .first_text()
                .unwrap_or("Tool reported an error")
                .to_string();
            let err = ExecutorError::Execution(message);
            return (
                record
                    .with_disposition(AttemptDisposition::ExecutorError)
                    .with_error(err.to_string()),
                AttemptStep::Transient(InvocationError::executor(&err)),
            );
        }

        (
            record.with_disposition(AttemptDisposition::Dispatched),
            AttemptStep::Success(output),
        )
    }

    async fn verify(&self, policy_id: &str, context: &PolicyContext) -> std::result::Result<PolicyDecision, DecisionError> {
        let call = self.decision_client.verify(&self.identity, policy_id, context);
        match self.decision_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(DecisionError::AuthorityUnreachable(format!(
                    "Decision request timed out after {:?}",
                    limit
                )))
            }),
            None => call.await,
        }
    }

    async fn execute(&self, tool_name: &str, arguments: Arguments) -> std::result::Result<ToolOutput, ExecutorError> {
        let call = self.executor.execute(tool_name, arguments);
        match self.executor_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(ExecutorError::Transport(format!(
                    "Executor call timed out after {:?}",
                    limit
                )))
            }),
            None => call.await,
        }
    }

    /// Denial decision for a marker found in executor output
    fn server_denial(&self, allow: Option<&PolicyDecision>, text: &str) -> PolicyDecision {
        let decision_id = match allow {
            Some(allow) => format!("{}-server", allow.decision_id),
            None => format!("srv_{}", uuid::Uuid::new_v4().simple()),
        };

        let message = text
            .find(&self.denial_marker)
            .map(|at| &text[at + self.denial_marker.len()..])
            .map(|rest| rest.trim_start_matches(':').trim())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(text);

        PolicyDecision::deny(decision_id, vec![DenialReason::new(SERVER_DENIAL_CODE, message)])
    }
}

fn rejected(record: AttemptRecord, err: &GatewayError) -> (AttemptRecord, AttemptStep) {
    tracing::error!(error = %err, "Permanent configuration error");
    (
        record
            .with_disposition(AttemptDisposition::Rejected)
            .with_error(err.to_string()),
        AttemptStep::Fatal(InvocationError::permanent(err)),
    )
}

/// Result of a single attempt
enum AttemptStep {
    Success(ToolOutput),
    Denied(PolicyDecision, DenialSource),
    Transient(InvocationError),
    Fatal(InvocationError),
}

/// How the next attempt derives its arguments
enum Carried {
    Adjusted,
    Resend,
}

/// Reason a suspension was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

impl Interrupt {
    fn into_error(self, options: &InvokeOptions) -> InvocationError {
        match self {
            Interrupt::Timeout => InvocationError::timeout(options.overall_timeout),
            Interrupt::Cancelled => InvocationError::cancelled(),
        }
    }
}

/// Overall deadline and cancellation for one invocation
struct Guard<'a> {
    deadline: Option<Instant>,
    options: &'a InvokeOptions,
}

impl<'a> Guard<'a> {
    fn new(options: &'a InvokeOptions) -> Self {
        Self {
            deadline: options
                .overall_timeout
                .and_then(|t| Instant::now().checked_add(t)),
            options,
        }
    }

    fn check(&self) -> std::result::Result<(), Interrupt> {
        if self.options.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupt::Timeout);
        }
        Ok(())
    }

    /// Run `fut` unless the deadline or cancellation fires first
    async fn run<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Interrupt> {
        let cancelled = async {
            match &self.options.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Interrupt::Cancelled),
            _ = expired => Err(Interrupt::Timeout),
            output = fut => Ok(output),
        }
    }
}
