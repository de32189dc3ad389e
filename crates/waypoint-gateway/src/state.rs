use std::sync::Arc;

use waypoint_agent::strategy::{
    chat_strategy, feedback_planner, points_of_interest_planner, JourneyForm,
    PointOfInterestFindings, TRAVEL_SYSTEM_PROMPT,
};
use waypoint_agent::{Agent, Graph, Services};
use waypoint_core::config::AppConfig;
use waypoint_core::error::Result;
use waypoint_core::traits::LlmClient;
use waypoint_tools::{ExitTool, ToolRegistry, WeatherTool};

/// Shared application state for axum handlers.
///
/// Graphs are built once; every request gets its own [`Agent`], so requests
/// never trip over each other's single-flight guard.
pub struct AppState {
    pub config: AppConfig,
    pub services: Services,
    pub chat: Graph<String, String>,
    pub planner: Graph<JourneyForm, String>,
    pub research: Graph<JourneyForm, PointOfInterestFindings>,
}

impl AppState {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let tools = ToolRegistry::new()
            .register(WeatherTool::new(config.tools.weather_api_url.clone()))?
            .register(ExitTool)?;
        Self::with_tools(config, llm, tools)
    }

    /// Same as [`AppState::new`] with a caller-supplied tool registry.
    pub fn with_tools(config: AppConfig, llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Result<Self> {
        let services =
            Services::new(llm, tools, config.model.clone()).with_config(config.agent.clone());
        Ok(Self {
            services,
            chat: chat_strategy()?,
            planner: feedback_planner()?,
            research: points_of_interest_planner()?,
            config,
        })
    }

    pub fn chat_agent(&self) -> Agent<String, String> {
        let agent = Agent::new(self.chat.clone(), self.services.clone());
        match &self.config.agent.system_prompt {
            Some(prompt) => agent.with_system_prompt(prompt.clone()),
            None => agent,
        }
    }

    pub fn planner_agent(&self) -> Agent<JourneyForm, String> {
        Agent::new(self.planner.clone(), self.services.clone()).with_system_prompt(TRAVEL_SYSTEM_PROMPT)
    }

    pub fn research_agent(&self) -> Agent<JourneyForm, PointOfInterestFindings> {
        Agent::new(self.research.clone(), self.services.clone())
    }
}
