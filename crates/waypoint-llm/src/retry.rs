use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use waypoint_core::config::{ModelConfig, RetryConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;
use waypoint_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative models.
///
/// Only errors classified as transient are retried. Once a stream has been
/// returned, failures inside it are surfaced to the caller unchanged.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

type DeltaStream<'a> = BoxStream<'a, Result<StreamDelta>>;

impl RetryingClient {
    /// Try the primary model, sleeping between transient failures.
    async fn primary_with_backoff(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<DeltaStream<'_>> {
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            let err = match self.primary.chat_stream(config, messages.to_vec(), tools).await {
                Ok(stream) => return Ok(stream),
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= max_retries {
                return Err(err);
            }
            let backoff = calculate_backoff(attempt, &self.retry_config);
            warn!(
                attempt = attempt + 1,
                max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying LLM request"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// First fallback model that accepts the request, if any.
    async fn first_fallback(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Option<DeltaStream<'_>> {
        for (fb_config, fb_client) in &self.fallbacks {
            match fb_client.chat_stream(fb_config, messages.to_vec(), tools).await {
                Ok(stream) => {
                    info!(
                        model = %fb_config.model_id,
                        provider = %fb_config.provider,
                        "Switched to fallback model"
                    );
                    return Some(stream);
                }
                Err(e) => warn!(model = %fb_config.model_id, error = %e, "Fallback model failed"),
            }
        }
        None
    }
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let err = match self.primary_with_backoff(&config, &messages, &tools).await {
                Ok(stream) => return Ok(stream),
                Err(e) => e,
            };

            // Invalid requests fail the same way on every model.
            if matches!(err, WaypointError::InvalidRequest(_)) || self.fallbacks.is_empty() {
                return Err(err);
            }

            info!(error = %err, "Primary model exhausted, trying fallbacks");
            match self.first_fallback(&messages, &tools).await {
                Some(stream) => Ok(stream),
                None => Err(err),
            }
        })
    }
}
