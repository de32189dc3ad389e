use waypoint_core::error::Result;
use waypoint_core::types::{Response, ToolCall, ToolResult};
use waypoint_tools::EXIT_TOOL_NAME;

use super::CHAT_FINISHED;
use crate::graph::{Graph, GraphBuilder, NodeHandle};
use crate::step::{request_llm, ExecuteTool, SendToolResult};

/// Question in, answer out. The model may call tools any number of times;
/// calling the exit tool ends the chat with [`CHAT_FINISHED`].
pub fn chat_strategy() -> Result<Graph<String, String>> {
    let mut g = GraphBuilder::<String, String>::new("chat");
    let send_input = g.add_node(request_llm("send_input"));
    let execute_tool = g.add_node(ExecuteTool::new("execute_tool"));
    let send_tool_result = g.add_node(SendToolResult::new("send_tool_result"));

    g.edge(g.start().to(&send_input));

    route_reply(&mut g, &send_input, &execute_tool);
    g.edge(execute_tool.to(&send_tool_result));
    route_reply(&mut g, &send_tool_result, &execute_tool);

    g.build()
}

fn route_reply<X>(
    g: &mut GraphBuilder<String, String>,
    from: &NodeHandle<X, Response>,
    execute_tool: &NodeHandle<ToolCall, ToolResult>,
) {
    g.edge(
        from.to(&g.finish())
            .on_tool_call(|call| call.tool == EXIT_TOOL_NAME)
            .transformed(|_| CHAT_FINISHED.to_string()),
    );
    g.edge(from.to(execute_tool).on_tool_call(|_| true));
    g.edge(from.to(&g.finish()).on_assistant_message(|_| true));
}
