use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use waypoint_core::error::Result;
use waypoint_core::event::{EventKind, ReasoningCallEvent};
use waypoint_core::types::{ChatMessage, LlmResponse, Response, ToolDefinition};

use super::{PromptFn, Step, StepKind};
use crate::context::ExecutionContext;
use crate::graph::StepData;

/// Appends a user prompt to the history and asks the reasoning service for
/// the next move: a plain answer or a tool call.
pub struct ReasoningCall<I> {
    name: String,
    prompt: PromptFn<I>,
    tools: Option<Vec<String>>,
}

impl<I> ReasoningCall<I> {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Fn(&ExecutionContext, &I) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: Arc::new(prompt),
            tools: None,
        }
    }

    /// Offer only the named tools instead of the whole registry.
    pub fn with_tools<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.tools = Some(Vec::new());
        self
    }
}

/// A reasoning call whose input is the user prompt itself.
pub fn request_llm(name: impl Into<String>) -> ReasoningCall<String> {
    ReasoningCall::new(name, |_: &ExecutionContext, input: &String| input.clone())
}

impl<I: StepData> Step for ReasoningCall<I> {
    type Input = I;
    type Output = Response;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::ReasoningCall
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        input: I,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let prompt = (self.prompt)(ctx, &input);
            if !prompt.is_empty() {
                ctx.push_message(ChatMessage::user(prompt));
            }
            call_llm(ctx, self.tools.as_deref()).await
        })
    }
}

/// Send the run's history to the reasoning service, bracketed by
/// `ReasoningCall` events, and record the reply in the history.
pub(crate) async fn call_llm(
    ctx: &mut ExecutionContext,
    only: Option<&[String]>,
) -> Result<Response> {
    let definitions: Vec<ToolDefinition> = ctx
        .tools()
        .definitions()
        .into_iter()
        .filter(|d| only.map_or(true, |names| names.iter().any(|n| n == &d.name)))
        .collect();

    ctx.emit(EventKind::ReasoningCall(ReasoningCallEvent::Before {
        prompt: ctx.history().to_vec(),
        model: ctx.model().model_id.clone(),
        tools: definitions.iter().map(|d| d.name.clone()).collect(),
    }))
    .await?;

    let services = ctx.services().clone();
    let reply = services
        .llm
        .chat(&services.model, ctx.history().to_vec(), &definitions)
        .await?;

    debug!(
        run_id = %ctx.run_id(),
        input_tokens = reply.usage.input_tokens,
        output_tokens = reply.usage.output_tokens,
        tool_calls = reply.tool_calls.len(),
        "Reasoning call completed"
    );

    ctx.emit(EventKind::ReasoningCall(ReasoningCallEvent::After {
        responses: responses_of(&reply),
        usage: reply.usage.clone(),
        moderation: reply.moderation.clone(),
    }))
    .await?;

    let message = match reply.tool_calls.first() {
        Some(call) => ChatMessage::assistant_tool_call(&reply.text, call),
        None => ChatMessage::assistant_text(reply.text.clone()),
    };
    ctx.push_message(message);

    Ok(reply.into_response())
}

/// Every response in a reply, text first.
fn responses_of(reply: &LlmResponse) -> Vec<Response> {
    let mut responses = Vec::with_capacity(reply.tool_calls.len() + 1);
    if !reply.text.is_empty() || reply.tool_calls.is_empty() {
        responses.push(Response::Assistant {
            content: reply.text.clone(),
        });
    }
    responses.extend(reply.tool_calls.iter().cloned().map(Response::ToolCall));
    responses
}
