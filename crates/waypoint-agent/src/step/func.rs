use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::error::Result;

use super::Step;
use crate::context::ExecutionContext;
use crate::graph::StepData;

type StepBody<I, O> =
    dyn for<'a> Fn(&'a mut ExecutionContext, I) -> BoxFuture<'a, Result<O>> + Send + Sync;

/// A step backed by an async closure with full access to the run context.
pub struct StepFn<I, O> {
    name: String,
    body: Arc<StepBody<I, O>>,
}

/// Wrap an async closure as a step.
///
/// ```ignore
/// let greet = step_fn("greet", |ctx, name: String| {
///     Box::pin(async move {
///         ctx.push_message(ChatMessage::user(format!("hello {name}")));
///         Ok(name.len())
///     })
/// });
/// ```
pub fn step_fn<I, O, F>(name: impl Into<String>, f: F) -> StepFn<I, O>
where
    F: for<'a> Fn(&'a mut ExecutionContext, I) -> BoxFuture<'a, Result<O>>
        + Send
        + Sync
        + 'static,
{
    StepFn {
        name: name.into(),
        body: Arc::new(f),
    }
}

impl<I: StepData, O: StepData> Step for StepFn<I, O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext, input: I) -> BoxFuture<'a, Result<O>> {
        (self.body)(ctx, input)
    }
}
