use futures::future::BoxFuture;
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::event::{EventKind, ToolEvent};
use waypoint_core::types::{ChatMessage, Response, ToolCall, ToolResult};

use super::reasoning::call_llm;
use super::{Step, StepKind};
use crate::context::ExecutionContext;

/// Invokes the requested tool from the registry.
///
/// Tool problems never fail the step. An unknown tool or rejected arguments
/// produce a `Tool.ValidationError`, any other failure a `Tool.CallFailure`,
/// and the step returns a failed [`ToolResult`] for the graph to route on.
pub struct ExecuteTool {
    name: String,
}

impl ExecuteTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for ExecuteTool {
    type Input = ToolCall;
    type Output = ToolResult;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::ToolExecution
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        call: ToolCall,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            ctx.emit(EventKind::Tool(ToolEvent::Call {
                call_id: call.id.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            }))
            .await?;

            let outcome = ctx.tools().invoke(&call).await;
            let (result, event) = match outcome {
                Ok(value) => {
                    debug!(tool = %call.tool, call_id = %call.id, "Tool call succeeded");
                    (
                        ToolResult::success(&call, value.clone()),
                        ToolEvent::CallResult {
                            call_id: call.id.clone(),
                            tool: call.tool.clone(),
                            args: call.args.clone(),
                            result: value,
                        },
                    )
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e @ (WaypointError::ToolNotFound(_) | WaypointError::ToolValidation(_))) => {
                    warn!(tool = %call.tool, error = %e, "Tool call rejected");
                    (
                        ToolResult::failure(&call, e.to_string()),
                        ToolEvent::ValidationError {
                            call_id: call.id.clone(),
                            tool: call.tool.clone(),
                            args: call.args.clone(),
                            error: e.to_string(),
                        },
                    )
                }
                Err(e) => {
                    warn!(tool = %call.tool, error = %e, "Tool execution failed");
                    (
                        ToolResult::failure(&call, e.to_string()),
                        ToolEvent::CallFailure {
                            call_id: call.id.clone(),
                            tool: call.tool.clone(),
                            args: call.args.clone(),
                            error: e.to_string(),
                        },
                    )
                }
            };

            ctx.emit(EventKind::Tool(event)).await?;
            ctx.record_tool(call, result.clone());
            Ok(result)
        })
    }
}

/// Feeds a tool result back into the history and asks the reasoning service
/// what to do next.
pub struct SendToolResult {
    name: String,
}

impl SendToolResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for SendToolResult {
    type Input = ToolResult;
    type Output = Response;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::SendToolResult
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        result: ToolResult,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            ctx.push_message(ChatMessage::tool_result(&result));
            call_llm(ctx, None).await
        })
    }
}
