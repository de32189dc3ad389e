//! Mocks and helpers shared by the Waypoint test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use waypoint_core::config::ModelConfig;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::event::{EventKind, EventReceiver, LifecycleEvent};
use waypoint_core::traits::{LlmClient, Tool};
use waypoint_core::types::*;

/// One request seen by [`MockLlmClient`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Scripted reasoning service. Replies are popped in order; once the script
/// is exhausted the fallback reply (if any) is repeated.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<LlmResponse>>>,
    fallback: Option<LlmResponse>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<LlmResponse>) -> Self {
        let client = Self::new();
        for r in responses {
            client.push(r);
        }
        client
    }

    pub fn push(&self, response: LlmResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response));
        }
    }

    /// Queue a failure for the next call.
    pub fn push_error(&self, error: WaypointError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    pub fn with_fallback(mut self, response: LlmResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> Result<LlmResponse> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| WaypointError::LlmRequest("mock script exhausted".into())),
        }
    }
}

/// Expand a complete reply into the deltas a streaming provider would send.
pub fn response_deltas(response: &LlmResponse) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();
    for word in response.text.split_inclusive(' ') {
        deltas.push(StreamDelta::TextDelta(word.to_string()));
    }
    for (index, call) in response.tool_calls.iter().enumerate() {
        deltas.push(StreamDelta::ToolUseStart {
            index,
            id: call.id.clone(),
            name: call.tool.clone(),
        });
        deltas.push(StreamDelta::ToolInputDelta {
            index,
            delta: call.args.to_string(),
        });
    }
    if let Some(moderation) = &response.moderation {
        deltas.push(StreamDelta::Moderation(moderation.clone()));
    }
    deltas.push(StreamDelta::Usage {
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
    });
    deltas.push(StreamDelta::Stop(
        response.stop_reason.clone().unwrap_or(StopReason::EndTurn),
    ));
    deltas
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let tools: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(RecordedRequest { messages, tools });
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let response = self.next_response()?;
            let deltas: Vec<Result<StreamDelta>> =
                response_deltas(&response).into_iter().map(Ok).collect();
            Ok(futures::stream::iter(deltas).boxed())
        })
    }
}

/// Returns its arguments unchanged.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move { Ok(args) })
    }
}

/// Always fails, either at execution or at argument validation.
pub struct FailingTool {
    message: String,
    validation: bool,
}

impl FailingTool {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            validation: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            validation: true,
        }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "A tool that always fails"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            if self.validation {
                Err(WaypointError::ToolValidation(self.message.clone()))
            } else {
                Err(WaypointError::ToolExecution {
                    tool: "failing".to_string(),
                    message: self.message.clone(),
                })
            }
        })
    }
}

/// Sleeps before answering `"done"`.
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "A tool that takes a while"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::json!("done"))
        })
    }
}

/// Drain a bus until every sender is gone.
pub async fn collect_events(mut rx: EventReceiver) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Dotted names of `events`, in order.
pub fn event_names(events: &[LifecycleEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

/// Dotted names of the events belonging to one run.
pub fn run_event_names(events: &[LifecycleEvent], run_id: &RunId) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| &e.run_id == run_id)
        .map(|e| e.kind.name())
        .collect()
}

/// Names of the nodes entered, in order, for one run.
pub fn visited_nodes(events: &[LifecycleEvent], run_id: &RunId) -> Vec<String> {
    events
        .iter()
        .filter(|e| &e.run_id == run_id)
        .filter_map(|e| match &e.kind {
            EventKind::Node(waypoint_core::event::NodeEvent::Before { node, .. }) => {
                Some(node.clone())
            }
            _ => None,
        })
        .collect()
}

pub fn text(content: &str) -> LlmResponse {
    LlmResponse::text(content).with_usage(10, 5)
}

pub fn tool_call(id: &str, tool: &str, args: serde_json::Value) -> LlmResponse {
    LlmResponse::tool_call(ToolCall::new(id, tool, args)).with_usage(10, 5)
}
