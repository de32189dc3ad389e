use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ChatMessage, Response};

use super::reasoning::call_llm;
use super::{PromptFn, Step, StepKind};
use crate::context::ExecutionContext;
use crate::graph::StepData;

/// Asks the reasoning service for a JSON value of type `T`, describing the
/// expected shape with its JSON schema. Replies that do not parse are sent
/// back with the parse error, up to `AgentConfig::structured_retries` times.
pub struct StructuredExtraction<I, T> {
    name: String,
    prompt: PromptFn<I>,
    _marker: PhantomData<fn() -> T>,
}

impl<I, T> StructuredExtraction<I, T> {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Fn(&ExecutionContext, &I) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: Arc::new(prompt),
            _marker: PhantomData,
        }
    }
}

impl<I, T> Step for StructuredExtraction<I, T>
where
    I: StepData,
    T: StepData + DeserializeOwned + JsonSchema,
{
    type Input = I;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::StructuredExtraction
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext, input: I) -> BoxFuture<'a, Result<T>> {
        Box::pin(async move {
            let schema = serde_json::to_string_pretty(&schemars::schema_for!(T))?;
            let prompt = (self.prompt)(ctx, &input);
            ctx.push_message(ChatMessage::user(format!(
                "{prompt}\n\nReply with a single JSON object that matches this JSON schema, \
                 and nothing else:\n{schema}"
            )));

            let attempts = ctx.config().structured_retries + 1;
            let no_tools: &[String] = &[];
            let mut last_error = String::new();
            for attempt in 1..=attempts {
                let content = match call_llm(ctx, Some(no_tools)).await? {
                    Response::Assistant { content } => content,
                    Response::ToolCall(call) => {
                        last_error = format!("expected JSON, got a call to tool '{}'", call.tool);
                        ctx.push_message(ChatMessage::user(fix_up(&last_error)));
                        continue;
                    }
                };
                match serde_json::from_str::<T>(strip_code_fence(&content)) {
                    Ok(value) => {
                        debug!(node = %self.name, attempt, "Structured output parsed");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(node = %self.name, attempt, error = %e, "Structured output rejected");
                        last_error = e.to_string();
                        ctx.push_message(ChatMessage::user(fix_up(&last_error)));
                    }
                }
            }

            Err(WaypointError::StructuredOutput {
                attempts,
                message: last_error,
            })
        })
    }
}

fn fix_up(error: &str) -> String {
    format!(
        "That reply could not be used: {error}. \
         Reply again with only the JSON object, following the schema exactly."
    )
}

/// The body of a fenced code block, or the trimmed text if there is none.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```\n"), "[1, 2]");
    }
}
