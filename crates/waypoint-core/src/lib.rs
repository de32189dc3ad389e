pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{GraphError, Result, WaypointError};
pub use event::{EventBus, EventKind, EventReceiver, EventSender, LifecycleEvent};
pub use types::*;
