use std::sync::Arc;

use waypoint_agent::{step_fn, Agent, GraphBuilder, RunParts, Services};
use waypoint_core::config::ModelConfig;
use waypoint_core::error::WaypointError;
use waypoint_core::types::RunStatus;
use waypoint_gateway::{ChannelSink, StreamEnd, StreamingAdapter};
use waypoint_test_utils::MockLlmClient;
use waypoint_tools::ToolRegistry;

#[tokio::test]
async fn test_sink_disconnect_cancels_the_run() {
    let mut g = GraphBuilder::<String, String>::new("stuck");
    let wait = g.add_node(step_fn::<String, String, _>("wait", |_ctx, _input| {
        Box::pin(futures::future::pending())
    }));
    g.edge(g.start().to(&wait));
    g.edge(wait.to(&g.finish()));
    let services = Services::new(
        Arc::new(MockLlmClient::new()),
        ToolRegistry::new(),
        ModelConfig::default(),
    );
    let agent = Agent::new(g.build().unwrap(), services);

    let RunParts {
        run_id,
        events,
        cancel,
        mut status,
        outcome,
    } = agent.run("go".to_string()).unwrap().into_parts();
    let (mut sink, mut client) = ChannelSink::new(4);

    let adapter = StreamingAdapter::new(run_id, cancel.clone());
    let forwarding = tokio::spawn(async move { adapter.forward(events, &mut sink).await });

    let first = client.recv().await.unwrap();
    assert_eq!(first.name(), "AgentStarted");
    drop(client);

    let summary = forwarding.await.unwrap();
    assert_eq!(summary.end, StreamEnd::Disconnected);
    assert_eq!(summary.forwarded, 1);
    assert!(cancel.is_cancelled());

    let result = outcome.wait().await;
    assert!(matches!(result, Err(WaypointError::Cancelled)));
    status.wait_for(|s| s.is_terminal()).await.unwrap();
    assert_eq!(*status.borrow(), RunStatus::Cancelled);
    assert!(!agent.is_running());
}
