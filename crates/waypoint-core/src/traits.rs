use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// LLM client: streaming chat completion.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;

    /// Send a chat request and accumulate the streamed deltas into one reply.
    fn chat<'a>(
        &'a self,
        config: &'a ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<LlmResponse>> {
        Box::pin(async move {
            let mut stream = self.chat_stream(config, messages, tools).await?;
            let mut response = LlmResponse::default();
            let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();

            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::TextDelta(text) => response.text.push_str(&text),
                    StreamDelta::ToolUseStart { index, id, name } => {
                        while tool_calls.len() <= index {
                            tool_calls.push(ToolCallAccumulator::default());
                        }
                        tool_calls[index].id = id;
                        tool_calls[index].name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Stop(reason) => response.stop_reason = Some(reason),
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        response.usage.input_tokens += input_tokens;
                        response.usage.output_tokens += output_tokens;
                    }
                    StreamDelta::Moderation(moderation) => response.moderation = Some(moderation),
                }
            }

            response.tool_calls = tool_calls
                .into_iter()
                .filter(|tc| !tc.name.is_empty())
                .map(|tc| {
                    // Unparseable arguments are kept verbatim for tool validation to report.
                    let args = if tc.input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&tc.input_json)
                            .unwrap_or(serde_json::Value::String(tc.input_json))
                    };
                    ToolCall::new(tc.id, tc.name, args)
                })
                .collect();

            Ok(response)
        })
    }
}

/// A named capability the reasoning service can invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. Malformed arguments should surface as
    /// [`crate::WaypointError::ToolValidation`].
    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedClient {
        deltas: Vec<StreamDelta>,
    }

    impl LlmClient for ScriptedClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let deltas: Vec<Result<StreamDelta>> = self.deltas.iter().cloned().map(Ok).collect();
            Box::pin(async move { Ok(futures::stream::iter(deltas).boxed()) })
        }
    }

    #[tokio::test]
    async fn test_chat_accumulates_deltas() {
        let client = ScriptedClient {
            deltas: vec![
                StreamDelta::TextDelta("Let me ".into()),
                StreamDelta::TextDelta("check.".into()),
                StreamDelta::ToolUseStart {
                    index: 0,
                    id: "call_1".into(),
                    name: "getWeather".into(),
                },
                StreamDelta::ToolInputDelta {
                    index: 0,
                    delta: "{\"city\":".into(),
                },
                StreamDelta::ToolInputDelta {
                    index: 0,
                    delta: "\"Paris\"}".into(),
                },
                StreamDelta::Usage {
                    input_tokens: 12,
                    output_tokens: 4,
                },
                StreamDelta::Stop(StopReason::ToolUse),
            ],
        };

        let config = ModelConfig::default();
        let response = client.chat(&config, vec![], &[]).await.unwrap();
        assert_eq!(response.text, "Let me check.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].args["city"], "Paris");
        assert_eq!(response.usage.total_tokens(), 16);
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[tokio::test]
    async fn test_chat_empty_tool_input_is_empty_object() {
        let client = ScriptedClient {
            deltas: vec![StreamDelta::ToolUseStart {
                index: 0,
                id: "c".into(),
                name: "__exit__".into(),
            }],
        };
        let config = ModelConfig::default();
        let response = client.chat(&config, vec![], &[]).await.unwrap();
        assert_eq!(response.tool_calls[0].args, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_chat_keeps_malformed_tool_input_verbatim() {
        let client = ScriptedClient {
            deltas: vec![
                StreamDelta::ToolUseStart {
                    index: 0,
                    id: "c".into(),
                    name: "getWeather".into(),
                },
                StreamDelta::ToolInputDelta {
                    index: 0,
                    delta: "{\"latitude\": 52.".into(),
                },
            ],
        };
        let config = ModelConfig::default();
        let response = client.chat(&config, vec![], &[]).await.unwrap();
        assert_eq!(
            response.tool_calls[0].args,
            serde_json::Value::String("{\"latitude\": 52.".into())
        );
    }
}
