pub mod builtin;
pub mod registry;

pub use builtin::exit::{ExitTool, EXIT_TOOL_NAME};
pub use builtin::weather::WeatherTool;
pub use registry::ToolRegistry;
