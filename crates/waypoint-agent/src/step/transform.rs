use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::error::Result;

use super::{Step, StepKind};
use crate::context::ExecutionContext;
use crate::graph::StepData;

/// Pure mapping from one value to another.
pub struct Transform<I, O> {
    name: String,
    f: Arc<dyn Fn(I) -> O + Send + Sync>,
}

impl<I, O> Transform<I, O> {
    pub fn new(name: impl Into<String>, f: impl Fn(I) -> O + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl<I: StepData, O: StepData> Step for Transform<I, O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Transform
    }

    fn execute<'a>(&'a self, _ctx: &'a mut ExecutionContext, input: I) -> BoxFuture<'a, Result<O>> {
        Box::pin(async move { Ok((self.f)(input)) })
    }
}
