use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::Tool;
use waypoint_core::types::{ToolCall, ToolDefinition};

/// Registry of available tools.
///
/// Read-only once handed to a graph; clones share the same tool instances
/// and can be used from concurrent runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    max_timeout_secs: Option<u64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every tool's own timeout at `secs`.
    pub fn with_max_timeout_secs(mut self, secs: u64) -> Self {
        self.max_timeout_secs = Some(secs);
        self
    }

    /// Register a tool, failing if the name is taken.
    pub fn try_register(&mut self, tool: impl Tool) -> Result<()> {
        self.insert(Arc::new(tool))
    }

    /// Builder form of [`try_register`](Self::try_register).
    pub fn register(mut self, tool: impl Tool) -> Result<Self> {
        self.try_register(tool)?;
        Ok(self)
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(WaypointError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Compose two registries. A name present in both is a configuration error.
    pub fn union(mut self, other: ToolRegistry) -> Result<Self> {
        for tool in other.tools.into_values() {
            self.insert(tool)?;
        }
        self.max_timeout_secs = match (self.max_timeout_secs, other.max_timeout_secs) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Ok(self)
    }

    /// Get a tool by exact, case-sensitive name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for sending to the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke the tool named by `call` with its arguments.
    pub async fn invoke(&self, call: &ToolCall) -> Result<serde_json::Value> {
        let tool = self
            .get(&call.tool)
            .ok_or_else(|| WaypointError::ToolNotFound(call.tool.clone()))?;

        let timeout_secs = match self.max_timeout_secs {
            Some(cap) => tool.timeout_secs().min(cap),
            None => tool.timeout_secs(),
        };

        if !call.args.is_object() {
            return Err(WaypointError::ToolValidation(format!(
                "arguments for '{}' must be a JSON object, got: {}",
                call.tool, call.args
            )));
        }

        debug!(tool = %call.tool, call_id = %call.id, timeout_secs, "Invoking tool");

        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tool.execute(call.args.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(WaypointError::ToolTimeout {
                tool: call.tool.clone(),
                timeout_secs,
            }),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
