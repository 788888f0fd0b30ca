//! In-memory executor for deterministic testing
//!
//! Records every call with the exact outbound arguments and answers from a
//! script, a responder function, or a default success message.

use super::{ExecutorError, ToolExecutor, ToolOutput};
use crate::request::Arguments;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

type Responder = Arc<dyn Fn(&str, &Arguments) -> Result<ToolOutput, ExecutorError> + Send + Sync>;

/// A call the executor received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool_name: String,
    pub arguments: Arguments,
}

/// Executor that records calls and replays scripted responses
pub struct RecordingExecutor {
    scripted: RwLock<VecDeque<Result<ToolOutput, ExecutorError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    calls: RwLock<Vec<RecordedCall>>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    /// Executor answering "Executed <tool>" to every call
    pub fn new() -> Self {
        Self {
            scripted: RwLock::new(VecDeque::new()),
            responder: None,
            delay: None,
            call_count: AtomicUsize::new(0),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Queue a successful output
    pub fn with_response(mut self, output: ToolOutput) -> Self {
        self.scripted.get_mut().push_back(Ok(output));
        self
    }

    /// Queue an error
    pub fn with_error(mut self, error: ExecutorError) -> Self {
        self.scripted.get_mut().push_back(Err(error));
        self
    }

    /// Answer unscripted calls with a function of the call
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &Arguments) -> Result<ToolOutput, ExecutorError> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Reject calls whose numeric `field` exceeds `limit` with a text denial,
    /// the way a policy-enforcing server reports it
    pub fn denying_above(self, field: impl Into<String>, limit: f64, marker: impl Into<String>) -> Self {
        let field = field.into();
        let marker = marker.into();
        self.with_responder(move |tool_name, arguments| {
            match arguments.get(&field).and_then(|v| v.as_f64()) {
                Some(value) if value > limit => Ok(ToolOutput::text(format!(
                    "{}: {} {} exceeds server limit {}",
                    marker, field, value, limit
                ))
                .with_error(true)),
                _ => Ok(ToolOutput::text(format!("Executed {}", tool_name))),
            }
        })
    }

    /// Simulate execution latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of execute calls received
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All calls received so far
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, tool_name: &str, arguments: Arguments) -> Result<ToolOutput, ExecutorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.write().await.push(RecordedCall {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(scripted) = self.scripted.write().await.pop_front() {
            return scripted;
        }

        match &self.responder {
            Some(responder) => responder(tool_name, &arguments),
            None => Ok(ToolOutput::text(format!("Executed {}", tool_name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Arguments {
        crate::request::into_arguments(value).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_then_default() {
        let executor = RecordingExecutor::new()
            .with_error(ExecutorError::Transport("connection reset".into()))
            .with_response(ToolOutput::text("first"));

        let first = executor.execute("send_message", Arguments::new()).await;
        assert_eq!(first, Err(ExecutorError::Transport("connection reset".into())));

        let second = executor.execute("send_message", Arguments::new()).await.unwrap();
        assert_eq!(second.first_text(), Some("first"));

        let third = executor.execute("send_message", Arguments::new()).await.unwrap();
        assert_eq!(third.first_text(), Some("Executed send_message"));
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_records_arguments() {
        let executor = RecordingExecutor::new();
        executor
            .execute("process_refund", args(json!({"amount": 10, "agent_id": "ap_1"})))
            .await
            .unwrap();

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "process_refund");
        assert_eq!(calls[0].arguments["agent_id"], json!("ap_1"));
    }

    #[tokio::test]
    async fn test_denying_above() {
        let executor = RecordingExecutor::new().denying_above("amount", 100.0, "Policy denied");

        let denied = executor
            .execute("process_refund", args(json!({"amount": 500})))
            .await
            .unwrap();
        assert!(denied.is_error);
        assert!(denied.marker_text("Policy denied").is_some());

        let allowed = executor
            .execute("process_refund", args(json!({"amount": 50})))
            .await
            .unwrap();
        assert!(!allowed.is_error);
    }
}
