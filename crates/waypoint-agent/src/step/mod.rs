//! Built-in steps.
//!
//! A [`Step`] is one typed unit of work: it receives the value delivered by
//! the incoming edge plus the run's [`ExecutionContext`] and produces the
//! value that outgoing edges route on.

pub mod func;
pub mod parallel;
pub mod reasoning;
pub mod structured;
pub mod tool;
pub mod transform;

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::error::Result;

use crate::context::ExecutionContext;
use crate::graph::StepData;

pub use func::{step_fn, StepFn};
pub use parallel::{parallel, parallel_graph, Parallel};
pub use reasoning::{request_llm, ReasoningCall};
pub use structured::StructuredExtraction;
pub use tool::{ExecuteTool, SendToolResult};
pub use transform::Transform;

/// What a step does, as far as graph validation and events are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Virtual start/finish nodes.
    Passthrough,
    ReasoningCall,
    ToolExecution,
    SendToolResult,
    Transform,
    StructuredExtraction,
    Parallel,
    Custom,
}

pub trait Step: Send + Sync + 'static {
    type Input: StepData;
    type Output: StepData;

    /// Node name; unique within a graph.
    fn name(&self) -> &str;

    fn kind(&self) -> StepKind {
        StepKind::Custom
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        input: Self::Input,
    ) -> BoxFuture<'a, Result<Self::Output>>;
}

/// Builds a prompt from the step input. Has read access to the run context
/// for ambient data such as the agent input.
pub type PromptFn<I> = Arc<dyn Fn(&ExecutionContext, &I) -> String + Send + Sync>;

/// Hands its input straight through. Backs the virtual start and finish nodes.
pub struct Passthrough<T> {
    name: String,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Passthrough<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: StepData> Step for Passthrough<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Passthrough
    }

    fn execute<'a>(&'a self, _ctx: &'a mut ExecutionContext, input: T) -> BoxFuture<'a, Result<T>> {
        Box::pin(async move { Ok(input) })
    }
}
