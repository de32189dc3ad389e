use std::any::Any;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use waypoint_core::config::{AgentConfig, ModelConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::event::{EventKind, EventSender, LifecycleEvent};
use waypoint_core::traits::LlmClient;
use waypoint_core::types::{AgentId, ChatMessage, RunId, ToolCall, ToolResult};
use waypoint_tools::ToolRegistry;

/// Capabilities a run is wired to. Shared read-only by every run of an agent.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolRegistry,
    pub model: ModelConfig,
    pub config: AgentConfig,
}

impl Services {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, model: ModelConfig) -> Self {
        Self {
            llm,
            tools,
            model,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.tools = self.tools.with_max_timeout_secs(config.tool_timeout_secs);
        self.config = config;
        self
    }
}

/// Sends lifecycle events stamped with one run's identity.
///
/// A failed send means the consumer is gone. The run's token is cancelled and
/// the send reports [`WaypointError::Cancelled`], so the walk stops instead of
/// running unobserved.
#[derive(Clone)]
pub struct Emitter {
    tx: EventSender,
    run_id: RunId,
    parent_run_id: Option<RunId>,
    cancel: CancellationToken,
}

impl Emitter {
    pub fn new(
        tx: EventSender,
        run_id: RunId,
        parent_run_id: Option<RunId>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            run_id,
            parent_run_id,
            cancel,
        }
    }

    pub async fn emit(&self, kind: EventKind) -> Result<()> {
        let event = LifecycleEvent::new(self.run_id.clone(), self.parent_run_id.clone(), kind);
        if self.tx.send(event).await.is_err() {
            if !self.cancel.is_cancelled() {
                warn!(run_id = %self.run_id, "Event consumer gone, cancelling run");
                self.cancel.cancel();
            }
            return Err(WaypointError::Cancelled);
        }
        Ok(())
    }
}

/// A tool call together with what came back.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Mutable state of one run. Owned by that run and never shared.
pub struct ExecutionContext {
    run_id: RunId,
    parent_run_id: Option<RunId>,
    agent_id: AgentId,
    history: Vec<ChatMessage>,
    tool_history: Vec<ToolInvocation>,
    services: Arc<Services>,
    emitter: Emitter,
    cancel: CancellationToken,
    agent_input: Arc<dyn Any + Send + Sync>,
}

impl ExecutionContext {
    pub(crate) fn new(
        run_id: RunId,
        agent_id: AgentId,
        services: Arc<Services>,
        tx: EventSender,
        cancel: CancellationToken,
        agent_input: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        let emitter = Emitter::new(tx, run_id.clone(), None, cancel.clone());
        Self {
            run_id,
            parent_run_id: None,
            agent_id,
            history: Vec::new(),
            tool_history: Vec::new(),
            services,
            emitter,
            cancel,
            agent_input,
        }
    }

    /// Context for a sub-run: copies the prompt history, starts an empty tool
    /// history, and cancels with its parent.
    pub fn fork(&self, run_id: RunId) -> Self {
        let cancel = self.cancel.child_token();
        let emitter = Emitter::new(
            self.emitter.tx.clone(),
            run_id.clone(),
            Some(self.run_id.clone()),
            cancel.clone(),
        );
        Self {
            run_id,
            parent_run_id: Some(self.run_id.clone()),
            agent_id: self.agent_id.clone(),
            history: self.history.clone(),
            tool_history: Vec::new(),
            services: self.services.clone(),
            emitter,
            cancel,
            agent_input: self.agent_input.clone(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn parent_run_id(&self) -> Option<&RunId> {
        self.parent_run_id.as_ref()
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    pub fn tool_history(&self) -> &[ToolInvocation] {
        &self.tool_history
    }

    pub fn record_tool(&mut self, call: ToolCall, result: ToolResult) {
        self.tool_history.push(ToolInvocation { call, result });
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.services.llm
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.services.tools
    }

    pub fn model(&self) -> &ModelConfig {
        &self.services.model
    }

    pub fn config(&self) -> &AgentConfig {
        &self.services.config
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub async fn emit(&self, kind: EventKind) -> Result<()> {
        self.emitter.emit(kind).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The input the agent was started with, shared by every sub-run.
    pub fn agent_input<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.agent_input.downcast_ref::<T>()
    }
}
