use thiserror::Error;

/// Structural problems found while building a graph. Always fatal at build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("node '{0}' is not reachable from start")]
    Unreachable(String),

    #[error("non-finish node '{0}' has no outgoing edge")]
    MissingEdge(String),

    #[error("no finish node is reachable from start in graph '{0}'")]
    FinishUnreachable(String),

    #[error("tool node '{0}' has no edge accepting failed tool results")]
    UnhandledToolFailure(String),
}

#[derive(Debug, Error)]
pub enum WaypointError {
    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    // Run-structural errors
    #[error("No outgoing edge matched the output of node '{node}'")]
    NoMatchingEdge { node: String },

    #[error("Run exceeded max iterations ({0})")]
    MaxIterationsExceeded(usize),

    #[error("Node '{node}' expected {expected} but received {found}")]
    TypeMismatch {
        node: String,
        expected: &'static str,
        found: &'static str,
    },

    // Step errors
    #[error("Step '{node}' failed: {message}")]
    Step { node: String, message: String },

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    #[error("LLM rejected request: {0}")]
    InvalidRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Structured output invalid after {attempts} attempts: {message}")]
    StructuredOutput { attempts: usize, message: String },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Concurrency errors
    #[error("Agent {agent_id} is already running")]
    AlreadyRunning { agent_id: String },

    #[error("Run cancelled")]
    Cancelled,

    // Aggregate errors
    #[error("Parallel branch {index} failed: {source}")]
    Parallel {
        index: usize,
        #[source]
        source: Box<WaypointError>,
    },

    // Transport errors
    #[error("Event sink closed")]
    SinkClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaypointError {
    /// Whether a reasoning-service error is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LlmTimeout(_) | Self::RateLimited(_) | Self::LlmStream(_) => true,
            Self::LlmRequest(msg) => {
                msg.contains("500")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Whether this error is a cancellation, possibly nested in a parallel branch.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Parallel { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WaypointError>;
