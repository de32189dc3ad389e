use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use waypoint_agent::strategy::travel::{Transport, Traveler};
use waypoint_agent::strategy::{
    feedback_planner, points_of_interest_planner, JourneyForm, TRAVEL_SYSTEM_PROMPT,
};
use waypoint_agent::{Agent, GraphBuilder, Services, StructuredExtraction};
use waypoint_core::config::{AgentConfig, ModelConfig};
use waypoint_core::error::WaypointError;
use waypoint_test_utils::{text, tool_call, EchoTool, MockLlmClient};
use waypoint_tools::{ExitTool, ToolRegistry};

fn form() -> JourneyForm {
    JourneyForm {
        from_city: "Amsterdam".into(),
        to_city: "Florence".into(),
        transport: Transport::Train,
        start_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        travelers: vec![Traveler { name: "Ana".into() }],
        details: Some("vegetarian food".into()),
    }
}

fn services(llm: Arc<MockLlmClient>) -> Services {
    let tools = ToolRegistry::new()
        .register(EchoTool)
        .and_then(|r| r.register(ExitTool))
        .unwrap();
    Services::new(llm, tools, ModelConfig::default())
}

fn poi_json(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "location": "Tuscany",
        "fromDate": "2026-05-02",
        "toDate": "2026-05-03",
        "description": "worth a stop"
    })
}

#[tokio::test]
async fn test_feedback_planner_pushes_towards_tools() {
    let llm = Arc::new(MockLlmClient::with_responses(vec![
        text("Florence is lovely in May."),
        tool_call("c1", "echo", json!({"city": "Florence"})),
        text("Here is your plan."),
    ]));
    let agent = Agent::new(feedback_planner().unwrap(), services(llm.clone()))
        .with_system_prompt(TRAVEL_SYSTEM_PROMPT);

    let (_, result) = agent.run(form()).unwrap().finish().await;

    assert_eq!(result.unwrap(), "Here is your plan.");
    let requests = llm.requests();
    assert_eq!(requests.len(), 3);

    let first = requests[0].messages[1].text();
    assert!(first.contains("Travelling from Amsterdam to Florence."));
    assert!(first.contains("Additional details: vegetarian food"));

    let feedback = requests[1].messages.last().unwrap().text();
    assert!(feedback.starts_with("Don't chat with plain text!"));
    assert!(feedback.contains("\n- echo"));
    assert!(feedback.contains("\n- __exit__"));
}

#[tokio::test]
async fn test_feedback_planner_exit_after_feedback() {
    let llm = Arc::new(MockLlmClient::with_responses(vec![
        text("chatting"),
        tool_call("c1", "__exit__", json!({})),
    ]));
    let agent = Agent::new(feedback_planner().unwrap(), services(llm));

    let (_, result) = agent.run(form()).unwrap().finish().await;

    assert_eq!(result.unwrap(), "Chat finished");
}

#[tokio::test]
async fn test_points_of_interest_are_researched_in_parallel() {
    let ideas = json!({"pointsOfInterest": [poi_json("Lucca"), poi_json("Siena")]});
    let research = json!({
        "pointOfInterest": poi_json("Lucca"),
        "research": "Walk the city walls.",
        "links": []
    });
    let llm = Arc::new(
        MockLlmClient::with_responses(vec![text(&ideas.to_string())])
            .with_fallback(text(&format!("```json\n{}\n```", research))),
    );
    let agent = Agent::new(points_of_interest_planner().unwrap(), services(llm.clone()));

    let (_, result) = agent.run(form()).unwrap().finish().await;

    let findings = result.unwrap();
    assert_eq!(findings.points.len(), 2);
    assert_eq!(findings.points[0].research, "Walk the city walls.");
    assert_eq!(llm.call_count(), 3);

    // Branch prompts read the journey form shared by the whole run.
    let research_prompts: Vec<String> = llm
        .requests()
        .iter()
        .skip(1)
        .filter_map(|r| r.messages.last().map(|m| m.text()))
        .collect();
    assert_eq!(research_prompts.len(), 2);
    for prompt in &research_prompts {
        assert!(prompt.contains("Details from the traveler: Ana."));
        assert!(prompt.contains("departure from 2026-05-01 to 2026-05-10"));
    }
    assert!(research_prompts.iter().any(|p| p.contains("- Name: Lucca")));
    assert!(research_prompts.iter().any(|p| p.contains("- Name: Siena")));
    assert!(llm.requests().iter().all(|r| r.tools.is_empty()));
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
struct Score {
    value: u32,
}

fn scoring_agent(llm: Arc<MockLlmClient>, retries: usize) -> Agent<String, Score> {
    let mut g = GraphBuilder::<String, Score>::new("score");
    let extract = g.add_node(StructuredExtraction::<String, Score>::new(
        "extract",
        |_: &waypoint_agent::ExecutionContext, input: &String| format!("Score this: {}", input),
    ));
    g.edge(g.start().to(&extract));
    g.edge(extract.to(&g.finish()));
    let config = AgentConfig {
        structured_retries: retries,
        ..AgentConfig::default()
    };
    Agent::new(g.build().unwrap(), services(llm).with_config(config))
}

#[tokio::test]
async fn test_structured_extraction_recovers_from_bad_json() {
    let llm = Arc::new(MockLlmClient::with_responses(vec![
        text("about seven"),
        text(r#"{"value": 7}"#),
    ]));
    let agent = scoring_agent(llm.clone(), 2);

    let (_, result) = agent.run("the film".to_string()).unwrap().finish().await;

    assert_eq!(result.unwrap().value, 7);
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].messages[0].text().contains("\"value\""));
    assert!(requests[1]
        .messages
        .last()
        .unwrap()
        .text()
        .starts_with("That reply could not be used"));
}

#[tokio::test]
async fn test_structured_extraction_gives_up_after_retries() {
    let llm = Arc::new(MockLlmClient::new().with_fallback(text("no idea")));
    let agent = scoring_agent(llm.clone(), 1);

    let (_, result) = agent.run("the film".to_string()).unwrap().finish().await;

    match result {
        Err(WaypointError::StructuredOutput { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(llm.call_count(), 2);
}
