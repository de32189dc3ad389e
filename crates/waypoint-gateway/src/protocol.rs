use serde::{Deserialize, Serialize};

/// A tool call as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRef {
    pub call_id: String,
    pub name: String,
}

/// Event pushed to clients. Internal lifecycle events are mapped onto this
/// smaller vocabulary; everything else stays inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    AgentStarted { agent_id: String, run_id: String },
    #[serde(rename_all = "camelCase")]
    AgentFinished {
        agent_id: String,
        run_id: String,
        result: serde_json::Value,
        /// Present when the run ended in an error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolStarted { tools: Vec<ToolRef> },
    ToolFinished { tools: Vec<ToolRef> },
    Message { messages: Vec<String> },
}

impl DomainEvent {
    /// Name used as the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentStarted { .. } => "AgentStarted",
            Self::AgentFinished { .. } => "AgentFinished",
            Self::ToolStarted { .. } => "ToolStarted",
            Self::ToolFinished { .. } => "ToolFinished",
            Self::Message { .. } => "Message",
        }
    }
}
