pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use waypoint_core::config::{AppConfig, ModelConfig};
use waypoint_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    if !matches!(
        config.provider.as_str(),
        "openai" | "ollama" | "groq" | "openrouter" | "vllm"
    ) {
        tracing::warn!(
            provider = %config.provider,
            "Unknown provider, using the OpenAI-compatible client"
        );
    }
    Box::new(OpenAiClient::new())
}

/// Build the client for an application config, wrapping it in retry and
/// fallback handling when either is configured.
pub fn build_client(config: &AppConfig) -> Arc<dyn LlmClient> {
    let primary = create_client(&config.model);
    if config.model.retry.is_none() && config.fallback_models.is_empty() {
        return Arc::from(primary);
    }

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();
    Arc::new(RetryingClient::new(
        primary,
        fallbacks,
        config.model.retry.clone().unwrap_or_default(),
    ))
}
