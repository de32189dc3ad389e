use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaypointError};

/// Top-level Waypoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on node executions per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Capacity of the bounded lifecycle event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Fix-up attempts for structured extraction before giving up.
    #[serde(default = "default_structured_retries")]
    pub structured_retries: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            event_buffer: default_event_buffer(),
            tool_timeout_secs: default_tool_timeout(),
            structured_retries: default_structured_retries(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_weather_api_url")]
    pub weather_api_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            weather_api_url: default_weather_api_url(),
        }
    }
}

fn default_max_iterations() -> usize { 50 }
fn default_event_buffer() -> usize { 64 }
fn default_tool_timeout() -> u64 { 30 }
fn default_structured_retries() -> usize { 3 }
fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }
fn default_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_weather_api_url() -> String { "https://api.open-meteo.com".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WaypointError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WaypointError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(WaypointError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.event_buffer == 0 {
            return Err(WaypointError::Config(
                "agent.event_buffer must be at least 1".into(),
            ));
        }
        for model in std::iter::once(&self.model).chain(&self.fallback_models) {
            if model.model_id.trim().is_empty() {
                return Err(WaypointError::Config("model_id must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn gateway_or_default(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }
}

/// Replace `${NAME}` with the value of env var `NAME`. Unset variables and
/// unterminated references are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(len) = after.find('}') else {
            rest = &rest[start..];
            break;
        };
        let name = &after[..len];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + len + 3]),
        }
        rest = &after[len + 1..];
    }

    out.push_str(rest);
    out
}
