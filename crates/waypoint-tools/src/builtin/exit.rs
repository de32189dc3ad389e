use futures::future::BoxFuture;

use waypoint_core::error::Result;
use waypoint_core::traits::Tool;

pub const EXIT_TOOL_NAME: &str = "__exit__";

/// Lets the model signal that the conversation is over.
pub struct ExitTool;

impl Tool for ExitTool {
    fn name(&self) -> &str {
        EXIT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Call this tool when the conversation is finished and no further action is needed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    fn execute(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async { Ok(serde_json::Value::String("Chat finished".to_string())) })
    }
}
