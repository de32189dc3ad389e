use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use waypoint_core::error::{Result, WaypointError};

use super::edge::Route;
use super::value::{DynValue, StepData};
use crate::context::ExecutionContext;
use crate::step::{Step, StepKind};

/// A step with its input and output types erased, as stored in a graph.
pub(crate) trait ErasedStep: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> StepKind;
    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        input: DynValue,
    ) -> BoxFuture<'a, Result<DynValue>>;
}

struct StepAdapter<S>(S);

impl<S: Step> ErasedStep for StepAdapter<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn kind(&self) -> StepKind {
        self.0.kind()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        input: DynValue,
    ) -> BoxFuture<'a, Result<DynValue>> {
        Box::pin(async move {
            let input = input
                .downcast::<S::Input>()
                .map_err(|found| WaypointError::TypeMismatch {
                    node: self.0.name().to_string(),
                    expected: std::any::type_name::<S::Input>(),
                    found,
                })?;
            let output = self.0.execute(ctx, input).await?;
            Ok(DynValue::new(output))
        })
    }
}

pub(crate) fn erase<S: Step>(step: S) -> Arc<dyn ErasedStep> {
    Arc::new(StepAdapter(step))
}

/// Typed reference to a node added to a [`GraphBuilder`](super::GraphBuilder).
pub struct NodeHandle<I, O> {
    name: Arc<str>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> NodeHandle<I, O> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<I, O: StepData> NodeHandle<I, O> {
    /// Start an edge from this node to `target`. The edge delivers this
    /// node's output unchanged until refined.
    pub fn to<TI, TO>(&self, target: &NodeHandle<TI, TO>) -> Route<O, O, TI> {
        Route::new(self.name(), target.name())
    }
}

impl<I, O> Clone for NodeHandle<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for NodeHandle<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.name).finish()
    }
}
