use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::RunId;

use super::{Step, StepKind};
use crate::context::ExecutionContext;
use crate::graph::{Graph, GraphBuilder, StepData};
use crate::walker::run_graph;

type Derive<I, SI> = Arc<dyn Fn(I) -> Vec<SI> + Send + Sync>;

/// Runs a sub-graph once per derived input, concurrently.
///
/// Each branch is a full run with its own context (a fork of the parent's)
/// and its own lifecycle events, parented to the current run. Outputs come
/// back in derivation order. The first failing branch cancels the others;
/// the step still waits for every branch to close before failing.
pub struct Parallel<I, SI, SO> {
    name: String,
    derive: Derive<I, SI>,
    subgraph: Graph<SI, SO>,
}

pub fn parallel<I, SI, SO>(
    name: impl Into<String>,
    derive: impl Fn(I) -> Vec<SI> + Send + Sync + 'static,
    subgraph: Graph<SI, SO>,
) -> Parallel<I, SI, SO> {
    Parallel {
        name: name.into(),
        derive: Arc::new(derive),
        subgraph,
    }
}

/// A graph whose only work is one [`Parallel`] step.
pub fn parallel_graph<I, SI, SO>(
    name: impl Into<String>,
    derive: impl Fn(I) -> Vec<SI> + Send + Sync + 'static,
    subgraph: Graph<SI, SO>,
) -> Result<Graph<I, Vec<SO>>>
where
    I: StepData,
    SI: StepData,
    SO: StepData,
{
    let name = name.into();
    let mut g = GraphBuilder::<I, Vec<SO>>::new(name.clone());
    let fan_out = g.add_node(parallel(name, derive, subgraph));
    g.edge(g.start().to(&fan_out));
    g.edge(fan_out.to(&g.finish()));
    g.build()
}

impl<I: StepData, SI: StepData, SO: StepData> Step for Parallel<I, SI, SO> {
    type Input = I;
    type Output = Vec<SO>;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Parallel
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        input: I,
    ) -> BoxFuture<'a, Result<Vec<SO>>> {
        Box::pin(async move {
            let inputs = (self.derive)(input);
            let total = inputs.len();
            debug!(node = %self.name, branches = total, "Launching parallel branches");

            let mut branches = JoinSet::new();
            let mut tokens = Vec::with_capacity(total);
            for (index, branch_input) in inputs.into_iter().enumerate() {
                let mut branch_ctx = ctx.fork(RunId::new());
                tokens.push(branch_ctx.cancel_token().clone());
                let graph = self.subgraph.clone();
                branches.spawn(async move {
                    let result = run_graph(&graph, &mut branch_ctx, branch_input).await;
                    (index, result)
                });
            }

            let mut outputs: Vec<Option<SO>> = (0..total).map(|_| None).collect();
            let mut failure: Option<WaypointError> = None;
            let mut cancelled = false;

            while let Some(joined) = branches.join_next().await {
                let error = match joined {
                    Ok((index, Ok(output))) => {
                        outputs[index] = Some(output);
                        continue;
                    }
                    Ok((_, Err(e))) if e.is_cancellation() => {
                        cancelled = true;
                        continue;
                    }
                    Ok((index, Err(e))) => WaypointError::Parallel {
                        index,
                        source: Box::new(e),
                    },
                    Err(e) => WaypointError::Step {
                        node: self.name.clone(),
                        message: format!("parallel branch aborted: {}", e),
                    },
                };
                if failure.is_none() {
                    warn!(node = %self.name, error = %error, "Parallel branch failed, cancelling the rest");
                    tokens.iter().for_each(|t| t.cancel());
                    failure = Some(error);
                }
            }

            if let Some(error) = failure {
                return Err(error);
            }
            if cancelled || ctx.is_cancelled() {
                return Err(WaypointError::Cancelled);
            }
            outputs
                .into_iter()
                .collect::<Option<Vec<SO>>>()
                .ok_or_else(|| WaypointError::Step {
                    node: self.name.clone(),
                    message: "a parallel branch produced no output".to_string(),
                })
        })
    }
}
