//! Graph orchestration engine.
//!
//! Build a [`Graph`] from [`Step`]s and typed edges, wrap it in an [`Agent`]
//! together with the [`Services`] it needs, and start runs. Every run streams
//! its lifecycle as ordered [`LifecycleEvent`](waypoint_core::LifecycleEvent)s.

pub mod context;
pub mod engine;
pub mod graph;
pub mod step;
pub mod strategy;
mod walker;

pub use context::{Emitter, ExecutionContext, Services, ToolInvocation};
pub use engine::{Agent, RunHandle, RunOutcome, RunParts};
pub use graph::{
    DynValue, Edge, EdgeCondition, Graph, GraphBuilder, NodeHandle, Route, StepData, FINISH_NODE,
    START_NODE,
};
pub use step::{
    parallel, parallel_graph, request_llm, step_fn, ExecuteTool, Parallel, ReasoningCall,
    SendToolResult, Step, StepFn, StepKind, StructuredExtraction, Transform,
};
