//! Ready-made graphs.

pub mod chat;
pub mod travel;

pub use chat::chat_strategy;
pub use travel::{
    feedback_planner, points_of_interest_planner, JourneyForm, PointOfInterestFindings,
    TRAVEL_SYSTEM_PROMPT,
};

/// Result of a conversation the model closed with the exit tool.
pub const CHAT_FINISHED: &str = "Chat finished";
