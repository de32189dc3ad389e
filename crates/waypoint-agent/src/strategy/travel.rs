//! Travel planning strategies.
//!
//! Both take a [`JourneyForm`]. The feedback planner keeps pushing the model
//! towards tools until it answers; the points-of-interest planner extracts
//! candidate stops and researches each of them concurrently.

use std::fmt;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use waypoint_core::error::Result;
use waypoint_core::types::{Response, ToolCall};
use waypoint_tools::EXIT_TOOL_NAME;

use super::CHAT_FINISHED;
use crate::context::ExecutionContext;
use crate::graph::{Graph, GraphBuilder, NodeHandle};
use crate::step::{parallel, ExecuteTool, ReasoningCall, SendToolResult, StructuredExtraction};

pub const TRAVEL_SYSTEM_PROMPT: &str = "You're an expert travel assistant helping users reach \
their destination in a reliable way.\n\n# Task description:\nYou can only call tools. Figure out \
the accurate information from calling the available tools, such as the weather tool.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Transport {
    Plane,
    Train,
    Bus,
    Car,
    Boat,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Traveler {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JourneyForm {
    pub from_city: String,
    pub to_city: String,
    pub transport: Transport,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub travelers: Vec<Traveler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JourneyForm {
    fn traveler_names(&self) -> String {
        let names: Vec<&str> = self.travelers.iter().map(|t| t.name.as_str()).collect();
        names.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    pub name: String,
    pub location: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryIdeas {
    pub points_of_interest: Vec<PointOfInterest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResearchedPointOfInterest {
    pub point_of_interest: PointOfInterest,
    pub research: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PointOfInterestFindings {
    pub points: Vec<ResearchedPointOfInterest>,
}

fn journey_prompt(form: &JourneyForm) -> String {
    let mut prompt = format!(
        "# Task description\n\
         Find points of interest that are relevant to the travel journey and travelers.\n\
         Consider an appropriate order and put a rough date range on each point of interest.\n\n\
         ## Details\n\
         - The travelers are {}.\n\
         - Travelling from {} to {}.\n\
         - Leaving on {}, and returning on {}.\n\
         - The preferred transportation method is {}.",
        form.traveler_names(),
        form.from_city,
        form.to_city,
        form.start_date,
        form.end_date,
        form.transport,
    );
    if let Some(details) = &form.details {
        prompt.push_str(&format!("\n- Additional details: {}", details));
    }
    prompt
}

fn research_prompt(ctx: &ExecutionContext, idea: &PointOfInterest) -> String {
    let mut prompt = String::from(
        "Research the following point of interest.\n\
         Consider interesting stories about art and culture and famous people.\n",
    );
    if let Some(form) = ctx.agent_input::<JourneyForm>() {
        prompt.push_str(&format!(
            "Details from the traveler: {}.\n\
             Dates to consider: departure from {} to {}.\n",
            form.traveler_names(),
            form.start_date,
            form.end_date,
        ));
    }
    prompt.push_str(&format!(
        "If any particularly important events are happening here during this time, \
         mention them and list specific dates.\n\n\
         # Point of interest to research\n\
         - Name: {}\n\
         - Location: {}\n\
         - From {} to {}\n\
         - Description: {}",
        idea.name, idea.location, idea.from_date, idea.to_date, idea.description,
    ));
    prompt
}

fn feedback_prompt(ctx: &ExecutionContext) -> String {
    let mut prompt =
        String::from("Don't chat with plain text! Call one of the available tools, instead:");
    for name in ctx.tools().names() {
        prompt.push_str("\n- ");
        prompt.push_str(name);
    }
    prompt
}

/// Plans a journey by insisting on tool use: plain-text answers to the first
/// prompt are met with a reminder listing the available tools.
pub fn feedback_planner() -> Result<Graph<JourneyForm, String>> {
    let mut g = GraphBuilder::<JourneyForm, String>::new("travel-planner");
    let send_input = g.add_node(ReasoningCall::new("send_input", |_: &ExecutionContext, form: &JourneyForm| {
        journey_prompt(form)
    }));
    let give_feedback = g.add_node(ReasoningCall::new(
        "give_feedback_to_call_tools",
        |ctx: &ExecutionContext, _: &String| feedback_prompt(ctx),
    ));
    let execute_tool = g.add_node(ExecuteTool::new("execute_tool"));
    let send_tool_result = g.add_node(SendToolResult::new("send_tool_result"));

    g.edge(g.start().to(&send_input));

    g.edge(send_input.to(&execute_tool).on_tool_call(|_| true));
    g.edge(send_input.to(&give_feedback).on_assistant_message(|_| true));

    g.edge(
        give_feedback
            .to(&execute_tool)
            .on_tool_call(|call| call.tool != EXIT_TOOL_NAME),
    );
    finish_on_exit(&mut g, &give_feedback);
    g.edge(give_feedback.to(&g.finish()).on_assistant_message(|_| true));

    g.edge(execute_tool.to(&send_tool_result));

    g.edge(send_tool_result.to(&g.finish()).on_assistant_message(|_| true));
    finish_on_exit(&mut g, &send_tool_result);
    g.edge(send_tool_result.to(&execute_tool).on_tool_call(|_| true));

    g.build()
}

fn finish_on_exit<X>(g: &mut GraphBuilder<JourneyForm, String>, from: &NodeHandle<X, Response>) {
    g.edge(
        from.to(&g.finish())
            .on_tool_call(|call: &ToolCall| call.tool == EXIT_TOOL_NAME)
            .transformed(|_| CHAT_FINISHED.to_string()),
    );
}

fn research_point_of_interest() -> Result<Graph<PointOfInterest, ResearchedPointOfInterest>> {
    let mut g = GraphBuilder::<PointOfInterest, ResearchedPointOfInterest>::new(
        "research-point-of-interest",
    );
    let research = g.add_node(StructuredExtraction::<PointOfInterest, ResearchedPointOfInterest>::new(
        "research",
        research_prompt,
    ));
    g.edge(g.start().to(&research));
    g.edge(research.to(&g.finish()));
    g.build()
}

/// Extracts points of interest for the journey, then researches each one in
/// its own concurrent sub-run.
pub fn points_of_interest_planner() -> Result<Graph<JourneyForm, PointOfInterestFindings>> {
    let research = research_point_of_interest()?;

    let mut g = GraphBuilder::<JourneyForm, PointOfInterestFindings>::new("points-of-interest");
    let ideas = g.add_node(StructuredExtraction::<JourneyForm, ItineraryIdeas>::new(
        "points_of_interest",
        |_: &ExecutionContext, form: &JourneyForm| journey_prompt(form),
    ));
    let research_points = g.add_node(parallel(
        "research_points",
        |ideas: ItineraryIdeas| ideas.points_of_interest,
        research,
    ));

    g.edge(g.start().to(&ideas));
    g.edge(ideas.to(&research_points));
    g.edge(
        research_points
            .to(&g.finish())
            .transformed(|points| PointOfInterestFindings { points }),
    );

    g.build()
}
