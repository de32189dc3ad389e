//! Client-facing side of Waypoint: the streaming adapter that turns lifecycle
//! events into domain events, and an SSE gateway built on axum.

pub mod adapter;
pub mod protocol;
mod routes;
mod server;
pub mod sink;
mod state;

pub use adapter::{translate, StreamEnd, StreamSummary, StreamingAdapter};
pub use protocol::{DomainEvent, ToolRef};
pub use server::GatewayServer;
pub use sink::{ChannelSink, EventSink};
pub use state::AppState;
