use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use waypoint_core::error::{GraphError, Result, WaypointError};
use waypoint_core::event::{AgentEvent, EventKind, NodeEvent, StrategyEvent};

use crate::context::ExecutionContext;
use crate::graph::{DynValue, Graph, GraphInner, StepData, START_NODE};
use crate::step::StepKind;

/// Run `graph` to completion inside `ctx`, bracketed by the agent and
/// strategy lifecycle events.
///
/// Exactly one of `Agent.Finished` or `Agent.RunError` is emitted, and
/// `Agent.BeforeClose` is always the last event of the run, whatever the
/// outcome.
pub(crate) async fn run_graph<I: StepData, O: StepData>(
    graph: &Graph<I, O>,
    ctx: &mut ExecutionContext,
    input: I,
) -> Result<O> {
    let agent_id = ctx.agent_id().to_string();
    let strategy = graph.name().to_string();
    info!(
        run_id = %ctx.run_id(),
        parent_run_id = ?ctx.parent_run_id().map(|id| id.to_string()),
        strategy = %strategy,
        "Run started"
    );

    let result: Result<O> = async {
        ctx.emit(EventKind::Agent(AgentEvent::Started {
            agent_id: agent_id.clone(),
            strategy: strategy.clone(),
        }))
        .await?;
        ctx.emit(EventKind::Strategy(StrategyEvent::Started {
            strategy: strategy.clone(),
        }))
        .await?;

        let output = walk(&graph.inner, ctx, DynValue::new(input)).await?;
        let json = output.to_json();
        let output = output
            .downcast::<O>()
            .map_err(|found| WaypointError::TypeMismatch {
                node: strategy.clone(),
                expected: std::any::type_name::<O>(),
                found,
            })?;

        ctx.emit(EventKind::Strategy(StrategyEvent::Finished {
            strategy: strategy.clone(),
            result: json.clone(),
        }))
        .await?;
        ctx.emit(EventKind::Agent(AgentEvent::Finished {
            agent_id: agent_id.clone(),
            result: json,
        }))
        .await?;
        Ok(output)
    }
    .await;

    match &result {
        Ok(_) => info!(run_id = %ctx.run_id(), "Run finished"),
        Err(e) => {
            if e.is_cancellation() {
                info!(run_id = %ctx.run_id(), "Run cancelled");
            } else {
                warn!(run_id = %ctx.run_id(), error = %e, "Run failed");
            }
            // The consumer may already be gone; the error itself is returned.
            let _ = ctx
                .emit(EventKind::Agent(AgentEvent::RunError {
                    agent_id: agent_id.clone(),
                    error: e.to_string(),
                }))
                .await;
        }
    }

    if let Err(e) = ctx
        .emit(EventKind::Agent(AgentEvent::BeforeClose { agent_id }))
        .await
    {
        debug!(run_id = %ctx.run_id(), error = %e, "BeforeClose not delivered");
    }

    result
}

/// Follow edges from the start node until a finish node completes.
async fn walk(graph: &GraphInner, ctx: &mut ExecutionContext, input: DynValue) -> Result<DynValue> {
    let max_iterations = ctx.config().max_iterations;
    let mut current: &str = START_NODE;
    let mut value = input;
    let mut iterations = 0usize;

    loop {
        if ctx.is_cancelled() {
            return Err(WaypointError::Cancelled);
        }
        if iterations >= max_iterations {
            return Err(WaypointError::MaxIterationsExceeded(max_iterations));
        }
        iterations += 1;

        let step = graph
            .node(current)
            .ok_or_else(|| GraphError::UnknownNode(current.to_string()))?;

        let node_input = value.to_json();
        ctx.emit(EventKind::Node(NodeEvent::Before {
            node: current.to_string(),
            input: node_input.clone(),
        }))
        .await?;

        let cancel = ctx.cancel_token().clone();
        let is_parallel = step.kind() == StepKind::Parallel;
        let node = current.to_string();
        // A panicking step fails its node like any other step error.
        let execution = AssertUnwindSafe(step.execute(ctx, value))
            .catch_unwind()
            .map(move |caught| {
                caught.unwrap_or_else(|payload| {
                    Err(WaypointError::Step {
                        node,
                        message: format!("panicked: {}", panic_message(payload.as_ref())),
                    })
                })
            });
        let outcome = if is_parallel {
            // Drains its own branches on cancellation so each one closes.
            execution.await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(WaypointError::Cancelled),
                r = execution => r,
            }
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                if !e.is_cancellation() {
                    error!(node = %current, error = %e, "Node execution failed");
                    let _ = ctx
                        .emit(EventKind::Node(NodeEvent::ExecutionError {
                            node: current.to_string(),
                            error: e.to_string(),
                        }))
                        .await;
                }
                return Err(e);
            }
        };

        ctx.emit(EventKind::Node(NodeEvent::After {
            node: current.to_string(),
            input: node_input,
            output: output.to_json(),
        }))
        .await?;

        if graph.is_finish(current) {
            return Ok(output);
        }

        let next = graph
            .outgoing(current)
            .iter()
            .find_map(|edge| edge.evaluate(&output).map(|delivered| (edge, delivered)));
        match next {
            Some((edge, delivered)) => {
                debug!(
                    from = %current,
                    to = %edge.to,
                    condition = ?edge.condition,
                    "Following edge"
                );
                current = edge.to.as_str();
                value = delivered;
            }
            None => {
                return Err(WaypointError::NoMatchingEdge {
                    node: current.to_string(),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
