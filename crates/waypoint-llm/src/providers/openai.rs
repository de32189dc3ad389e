use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use waypoint_core::config::ModelConfig;
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;
use waypoint_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

/// Map an HTTP failure onto the typed reasoning-service errors.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> WaypointError {
    let message = format!("HTTP {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => WaypointError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            WaypointError::LlmTimeout(REQUEST_TIMEOUT_SECS)
        }
        s if s == StatusCode::BAD_REQUEST
            || s == StatusCode::UNPROCESSABLE_ENTITY
            || s == StatusCode::UNAUTHORIZED
            || s == StatusCode::FORBIDDEN
            || s == StatusCode::NOT_FOUND =>
        {
            WaypointError::InvalidRequest(message)
        }
        _ => WaypointError::LlmRequest(message),
    }
}

fn classify_transport(e: reqwest::Error) -> WaypointError {
    if e.is_timeout() {
        WaypointError::LlmTimeout(REQUEST_TIMEOUT_SECS)
    } else if e.is_connect() {
        WaypointError::LlmRequest(format!("connection failed: {}", e))
    } else {
        WaypointError::LlmRequest(e.to_string())
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
pub(crate) struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct WireToolCall {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<WireFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct WireFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct WireTool {
    r#type: String,
    function: WireToolSpec,
}

#[derive(Serialize)]
pub(crate) struct WireToolSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: ChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            r#type: "function".to_string(),
            function: WireToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

impl WireMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(serde_json::Value::String(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: String, content: String) -> Self {
        Self {
            tool_call_id: Some(call_id),
            ..Self::text("tool", content)
        }
    }

    fn assistant_calls(text: String, calls: Vec<WireToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!text.is_empty()).then(|| serde_json::Value::String(text)),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }
}

/// Flatten the conversation into OpenAI chat messages. Tool results travel
/// as `tool` role messages keyed by call id.
pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => out.push(WireMessage::text("system", msg.text())),
            Role::User | Role::Tool => {
                let mut results = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some(WireMessage::tool_result(tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .peekable();
                if results.peek().is_some() {
                    out.extend(results);
                } else if msg.role == Role::User {
                    out.push(WireMessage::text("user", msg.text()));
                }
            }
            Role::Assistant => {
                let calls: Vec<WireToolCall> = msg
                    .tool_uses()
                    .into_iter()
                    .enumerate()
                    .map(|(index, (id, name, input))| WireToolCall {
                        index,
                        id: Some(id.to_string()),
                        r#type: Some("function".to_string()),
                        function: Some(WireFunction {
                            name: Some(name.to_string()),
                            arguments: Some(input.to_string()),
                        }),
                    })
                    .collect();
                if calls.is_empty() {
                    out.push(WireMessage::text("assistant", msg.text()));
                } else {
                    out.push(WireMessage::assistant_calls(msg.text(), calls));
                }
            }
        }
    }

    out
}

/// Decode one SSE event into zero or more deltas. `[DONE]` and unparseable
/// payloads yield nothing.
pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return Vec::new();
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Unparseable completion chunk");
            return Vec::new();
        }
    };

    if let Some(usage) = chunk.usage {
        return vec![Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })];
    }

    chunk
        .choices
        .into_iter()
        .next()
        .map(choice_deltas)
        .unwrap_or_default()
}

fn choice_deltas(choice: StreamChoice) -> Vec<Result<StreamDelta>> {
    if let Some(reason) = choice.finish_reason {
        return finish_deltas(&reason);
    }

    let mut deltas = Vec::new();
    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
        deltas.push(Ok(StreamDelta::TextDelta(text)));
    }

    // Some providers put the name and the whole argument string in one chunk.
    for call in choice.delta.tool_calls.unwrap_or_default() {
        let Some(function) = call.function else {
            continue;
        };
        if let Some(name) = function.name {
            deltas.push(Ok(StreamDelta::ToolUseStart {
                index: call.index,
                id: call.id.unwrap_or_default(),
                name,
            }));
        }
        if let Some(delta) = function.arguments {
            deltas.push(Ok(StreamDelta::ToolInputDelta {
                index: call.index,
                delta,
            }));
        }
    }
    deltas
}

/// A filtered completion reports moderation before it stops.
fn finish_deltas(reason: &str) -> Vec<Result<StreamDelta>> {
    let stop = match reason {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "content_filter" => {
            return vec![
                Ok(StreamDelta::Moderation(Moderation {
                    flagged: true,
                    categories: vec![reason.to_string()],
                })),
                Ok(StreamDelta::Stop(StopReason::EndTurn)),
            ];
        }
        _ => StopReason::EndTurn,
    };
    vec![Ok(StreamDelta::Stop(stop))]
}

/// Streaming request body; temperature is only sent when positive.
fn build_request(
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
    tools: &[ToolDefinition],
) -> ChatRequest {
    ChatRequest {
        model: config.model_id.clone(),
        messages: convert_messages(messages),
        max_tokens: config.max_tokens,
        temperature: (config.temperature > 0.0).then_some(config.temperature),
        stream: true,
        tools: convert_tools(tools),
        stream_options: StreamOptions {
            include_usage: true,
        },
    }
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = build_request(&config, messages, &tools);

            debug!(model = %config.model_id, tools = tools.len(), "Sending chat request");

            let mut req = self
                .http
                .post(base_url)
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req.send().await.map_err(classify_transport)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(classify_status(status, &body));
            }

            let byte_stream = response.bytes_stream();
            let sse_stream = SseStream::new(byte_stream);

            let delta_stream = sse_stream
                .map(|event| futures::stream::iter(parse_chunk(event)))
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_text_chunk() {
        let deltas = parse_chunk(event(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#));
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "Hi"));
    }

    #[test]
    fn test_parse_tool_call_chunk() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"getWeather","arguments":"{\"lat"}}]}}]}"#,
        ));
        assert_eq!(deltas.len(), 2);
        assert!(matches!(&deltas[0], Ok(StreamDelta::ToolUseStart { name, .. }) if name == "getWeather"));
        assert!(matches!(&deltas[1], Ok(StreamDelta::ToolInputDelta { index: 0, .. })));
    }

    #[test]
    fn test_parse_usage_and_done() {
        let deltas = parse_chunk(event(
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
        ));
        assert!(matches!(
            deltas[0],
            Ok(StreamDelta::Usage {
                input_tokens: 7,
                output_tokens: 3
            })
        ));
        assert!(parse_chunk(event("[DONE]")).is_empty());
    }

    #[test]
    fn test_content_filter_reports_moderation() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#,
        ));
        assert!(matches!(&deltas[0], Ok(StreamDelta::Moderation(m)) if m.flagged));
        assert!(matches!(&deltas[1], Ok(StreamDelta::Stop(StopReason::EndTurn))));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            WaypointError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad"),
            WaypointError::InvalidRequest(_)
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
    }

    #[test]
    fn test_convert_tool_round() {
        let call = ToolCall::new("c1", "getWeather", serde_json::json!({"latitude": 1.0}));
        let result = ToolResult::success(&call, serde_json::json!("sunny"));
        let msgs = convert_messages(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant_tool_call("", &call),
            ChatMessage::tool_result(&result),
        ]);
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_request_omits_zero_temperature() {
        let mut config = ModelConfig::default();
        config.temperature = 0.0;
        let body = serde_json::to_value(build_request(&config, vec![ChatMessage::user("hi")], &[]))
            .unwrap();
        assert!(body.get("temperature").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream_options"]["include_usage"], true);
    }
}
