use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use waypoint_agent::{parallel_graph, step_fn, Agent, Graph, GraphBuilder, Services};
use waypoint_core::config::ModelConfig;
use waypoint_core::error::WaypointError;
use waypoint_core::event::LifecycleEvent;
use waypoint_core::types::RunId;
use waypoint_test_utils::{run_event_names, MockLlmClient};
use waypoint_tools::ToolRegistry;

fn services() -> Services {
    Services::new(
        Arc::new(MockLlmClient::new()),
        ToolRegistry::new(),
        ModelConfig::default(),
    )
}

/// Sleeps `delay` seconds, then labels the input. A delay of zero fails.
fn labeller() -> Graph<u64, String> {
    let mut g = GraphBuilder::<u64, String>::new("label");
    let label = g.add_node(step_fn::<u64, String, _>("label", |_ctx, delay| {
        Box::pin(async move {
            if delay == 0 {
                return Err(WaypointError::Step {
                    node: "label".into(),
                    message: "zero delay".into(),
                });
            }
            tokio::time::sleep(Duration::from_secs(delay)).await;
            Ok(format!("slept {}", delay))
        })
    }));
    g.edge(g.start().to(&label));
    g.edge(label.to(&g.finish()));
    g.build().unwrap()
}

fn branch_ids(events: &[LifecycleEvent], root: &RunId) -> HashSet<RunId> {
    events
        .iter()
        .filter(|e| e.parent_run_id.as_ref() == Some(root))
        .map(|e| e.run_id.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_outputs_follow_input_order() {
    let graph = parallel_graph("fan-out", |delays: Vec<u64>| delays, labeller()).unwrap();
    let agent = Agent::new(graph, services());

    let handle = agent.run(vec![3, 1, 2]).unwrap();
    let root = handle.run_id().clone();
    let (events, result) = handle.finish().await;

    assert_eq!(
        result.unwrap(),
        vec!["slept 3", "slept 1", "slept 2"]
    );

    let branches = branch_ids(&events, &root);
    assert_eq!(branches.len(), 3);
    for branch in &branches {
        let names = run_event_names(&events, branch);
        assert_eq!(names.first(), Some(&"Agent.Started"));
        assert_eq!(names.last(), Some(&"Agent.BeforeClose"));
        assert!(names.contains(&"Agent.Finished"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_fails_the_aggregate_after_every_branch_closes() {
    let graph = parallel_graph("fan-out", |delays: Vec<u64>| delays, labeller()).unwrap();
    let agent = Agent::new(graph, services());

    let handle = agent.run(vec![30, 0, 30]).unwrap();
    let root = handle.run_id().clone();
    let (events, result) = handle.finish().await;

    match result {
        Err(WaypointError::Parallel { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, WaypointError::Step { .. }));
        }
        other => panic!("unexpected result {:?}", other),
    }

    let parent_failure = events
        .iter()
        .position(|e| e.run_id == root && e.kind.name() == "Node.ExecutionError")
        .expect("parent reports the failed node");

    let branches = branch_ids(&events, &root);
    assert_eq!(branches.len(), 3);
    for branch in &branches {
        let close = events
            .iter()
            .position(|e| &e.run_id == branch && e.is_before_close())
            .expect("every branch closes");
        assert!(close < parent_failure);
        let terminal = run_event_names(&events, branch)
            .into_iter()
            .filter(|n| *n == "Agent.Finished" || *n == "Agent.RunError")
            .count();
        assert_eq!(terminal, 1);
    }

    let root_names = run_event_names(&events, &root);
    assert_eq!(
        &root_names[root_names.len() - 2..],
        &["Agent.RunError", "Agent.BeforeClose"]
    );
}

#[tokio::test]
async fn test_panicking_branch_still_closes_every_run() {
    let mut g = GraphBuilder::<u64, String>::new("fragile");
    let check = g.add_node(step_fn::<u64, String, _>("check", |_ctx, n| {
        Box::pin(async move {
            if n == 1 {
                panic!("branch {} broke", n);
            }
            Ok::<_, WaypointError>(format!("ok {}", n))
        })
    }));
    g.edge(g.start().to(&check));
    g.edge(check.to(&g.finish()));
    let graph = parallel_graph("fan-out", |ns: Vec<u64>| ns, g.build().unwrap()).unwrap();
    let agent = Agent::new(graph, services());

    let handle = agent.run(vec![0, 1, 2]).unwrap();
    let root = handle.run_id().clone();
    let (events, result) = handle.finish().await;

    match result {
        Err(WaypointError::Parallel { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, WaypointError::Step { .. }));
        }
        other => panic!("unexpected result {:?}", other),
    }

    let branches = branch_ids(&events, &root);
    assert_eq!(branches.len(), 3);
    for branch in &branches {
        let names = run_event_names(&events, branch);
        assert_eq!(names.first(), Some(&"Agent.Started"));
        assert_eq!(names.last(), Some(&"Agent.BeforeClose"));
    }
    assert_eq!(
        run_event_names(&events, &root).last(),
        Some(&"Agent.BeforeClose")
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_fan_out_yields_empty_output() {
    let graph = parallel_graph("fan-out", |delays: Vec<u64>| delays, labeller()).unwrap();
    let agent = Agent::new(graph, services());

    let (events, result) = agent.run(Vec::new()).unwrap().finish().await;

    assert!(result.unwrap().is_empty());
    assert!(events.iter().all(|e| e.is_root()));
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_the_parent_closes_every_branch() {
    let graph = parallel_graph("fan-out", |delays: Vec<u64>| delays, labeller()).unwrap();
    let agent = Agent::new(graph, services());

    let mut handle = agent.run(vec![60, 60]).unwrap();
    let root = handle.run_id().clone();
    let mut events = Vec::new();
    let mut started = 0;
    while let Some(event) = handle.next_event().await {
        if !event.is_root() && event.kind.name() == "Agent.Started" {
            started += 1;
        }
        events.push(event);
        if started == 2 {
            break;
        }
    }
    handle.cancel();
    let (rest, result) = handle.finish().await;
    events.extend(rest);

    assert!(matches!(result, Err(WaypointError::Cancelled)));
    for branch in &branch_ids(&events, &root) {
        assert_eq!(
            run_event_names(&events, branch).last(),
            Some(&"Agent.BeforeClose")
        );
    }
    assert_eq!(
        run_event_names(&events, &root).last(),
        Some(&"Agent.BeforeClose")
    );
}
