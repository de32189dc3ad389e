use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypoint_core::event::{
    AgentEvent, EventKind, EventReceiver, LifecycleEvent, ReasoningCallEvent, ToolEvent,
};
use waypoint_core::types::{Response, RunId, Usage};

use crate::protocol::{DomainEvent, ToolRef};
use crate::sink::EventSink;

/// How a forwarded stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The root run emitted `Agent.BeforeClose`.
    Closed,
    /// The sink went away; the run was cancelled.
    Disconnected,
    /// The event bus closed before the root run said goodbye.
    BusClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    pub forwarded: usize,
    pub usage: Usage,
}

/// Drains one run's lifecycle events into a sink, translating as it goes.
pub struct StreamingAdapter {
    root_run: RunId,
    cancel: CancellationToken,
}

impl StreamingAdapter {
    pub fn new(root_run: RunId, cancel: CancellationToken) -> Self {
        Self { root_run, cancel }
    }

    /// Forward events one at a time until the root run closes or the sink
    /// disconnects. A disconnect cancels the run.
    pub async fn forward<S: EventSink>(self, mut events: EventReceiver, sink: &mut S) -> StreamSummary {
        let mut forwarded = 0;
        let mut usage = Usage::default();

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = sink.closed() => break StreamEnd::Disconnected,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break StreamEnd::BusClosed;
            };

            if let EventKind::ReasoningCall(ReasoningCallEvent::After { usage: u, .. }) = &event.kind {
                usage.add(u);
            }
            let closing = event.run_id == self.root_run && event.is_before_close();

            if let Some(domain) = translate(&event) {
                debug!(run_id = %event.run_id, event = domain.name(), "Forwarding event");
                if sink.send(domain).await.is_err() {
                    break StreamEnd::Disconnected;
                }
                forwarded += 1;
            }

            if closing {
                break StreamEnd::Closed;
            }
        };

        if end == StreamEnd::Disconnected {
            warn!(run_id = %self.root_run, "Sink disconnected, cancelling run");
            self.cancel.cancel();
        }
        // Dropping the receiver makes any further engine send fail fast.
        drop(events);

        info!(
            run_id = %self.root_run,
            forwarded,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total_tokens(),
            "Stream finished"
        );

        StreamSummary {
            end,
            forwarded,
            usage,
        }
    }
}

/// Map an internal event onto the client vocabulary. Node, strategy and
/// request-side reasoning events are not surfaced. Agent events of parallel
/// sub-runs are dropped so a client sees one start and one finish per
/// request; their tool and message events still come through.
pub fn translate(event: &LifecycleEvent) -> Option<DomainEvent> {
    let run_id = event.run_id.to_string();
    match &event.kind {
        EventKind::Agent(_) if !event.is_root() => None,
        EventKind::Agent(AgentEvent::Started { agent_id, .. }) => Some(DomainEvent::AgentStarted {
            agent_id: agent_id.clone(),
            run_id,
        }),
        EventKind::Agent(AgentEvent::Finished { agent_id, result }) => {
            Some(DomainEvent::AgentFinished {
                agent_id: agent_id.clone(),
                run_id,
                result: result.clone(),
                error: None,
            })
        }
        EventKind::Agent(AgentEvent::RunError { agent_id, error }) => {
            Some(DomainEvent::AgentFinished {
                agent_id: agent_id.clone(),
                run_id,
                result: serde_json::Value::Null,
                error: Some(error.clone()),
            })
        }
        EventKind::Agent(AgentEvent::BeforeClose { .. }) => None,
        EventKind::Tool(ToolEvent::Call { call_id, tool, .. }) => Some(DomainEvent::ToolStarted {
            tools: vec![ToolRef {
                call_id: call_id.clone(),
                name: tool.clone(),
            }],
        }),
        EventKind::Tool(
            ToolEvent::ValidationError { call_id, tool, .. }
            | ToolEvent::CallFailure { call_id, tool, .. }
            | ToolEvent::CallResult { call_id, tool, .. },
        ) => Some(DomainEvent::ToolFinished {
            tools: vec![ToolRef {
                call_id: call_id.clone(),
                name: tool.clone(),
            }],
        }),
        EventKind::ReasoningCall(ReasoningCallEvent::After { responses, .. }) => {
            let messages: Vec<String> = responses
                .iter()
                .filter_map(|r| match r {
                    Response::Assistant { content } if !content.is_empty() => Some(content.clone()),
                    _ => None,
                })
                .collect();
            (!messages.is_empty()).then_some(DomainEvent::Message { messages })
        }
        EventKind::ReasoningCall(ReasoningCallEvent::Before { .. })
        | EventKind::Strategy(_)
        | EventKind::Node(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::event::{EventBus, NodeEvent};
    use waypoint_core::types::ToolCall;

    use crate::sink::ChannelSink;

    fn event(run: &RunId, kind: EventKind) -> LifecycleEvent {
        LifecycleEvent::new(run.clone(), None, kind)
    }

    fn agent(kind: AgentEvent) -> EventKind {
        EventKind::Agent(kind)
    }

    #[test]
    fn test_translate_tool_events() {
        let run = RunId::new();
        let call = ToolCall::new("c1", "getWeather", serde_json::json!({}));
        let started = translate(&event(
            &run,
            EventKind::Tool(ToolEvent::Call {
                call_id: call.id.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            }),
        ));
        assert_eq!(started.map(|e| e.name()), Some("ToolStarted"));

        let failed = translate(&event(
            &run,
            EventKind::Tool(ToolEvent::ValidationError {
                call_id: "c1".into(),
                tool: "teleport".into(),
                args: serde_json::json!({}),
                error: "Tool not found: teleport".into(),
            }),
        ));
        match failed {
            Some(DomainEvent::ToolFinished { tools }) => {
                assert_eq!(tools[0].call_id, "c1");
                assert_eq!(tools[0].name, "teleport");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_translate_run_error_finishes_with_error() {
        let run = RunId::new();
        let translated = translate(&event(
            &run,
            agent(AgentEvent::RunError {
                agent_id: "a1".into(),
                error: "boom".into(),
            }),
        ));
        match translated {
            Some(DomainEvent::AgentFinished { error, result, .. }) => {
                assert_eq!(error.as_deref(), Some("boom"));
                assert!(result.is_null());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_internal_families_are_dropped() {
        let run = RunId::new();
        let node = EventKind::Node(NodeEvent::Before {
            node: "send_input".into(),
            input: serde_json::Value::Null,
        });
        assert!(translate(&event(&run, node)).is_none());
        let close = agent(AgentEvent::BeforeClose {
            agent_id: "a1".into(),
        });
        assert!(translate(&event(&run, close)).is_none());
        let silent = EventKind::ReasoningCall(ReasoningCallEvent::After {
            responses: vec![Response::ToolCall(ToolCall::new("c1", "echo", serde_json::json!({})))],
            usage: Usage::default(),
            moderation: None,
        });
        assert!(translate(&event(&run, silent)).is_none());
    }

    #[test]
    fn test_sub_run_agent_events_are_dropped() {
        let root = RunId::new();
        let branch = |kind| LifecycleEvent::new(RunId::new(), Some(root.clone()), kind);

        let started = agent(AgentEvent::Started {
            agent_id: "a1".into(),
            strategy: "research".into(),
        });
        assert!(translate(&branch(started)).is_none());
        let finished = agent(AgentEvent::Finished {
            agent_id: "a1".into(),
            result: serde_json::json!("done"),
        });
        assert!(translate(&branch(finished)).is_none());
        let failed = agent(AgentEvent::RunError {
            agent_id: "a1".into(),
            error: "boom".into(),
        });
        assert!(translate(&branch(failed)).is_none());

        let said = EventKind::ReasoningCall(ReasoningCallEvent::After {
            responses: vec![Response::Assistant {
                content: "Walls.".into(),
            }],
            usage: Usage::default(),
            moderation: None,
        });
        assert!(matches!(
            translate(&branch(said)),
            Some(DomainEvent::Message { .. })
        ));
    }

    #[tokio::test]
    async fn test_forward_stops_at_root_close_and_sums_usage() {
        let run = RunId::new();
        let (tx, rx) = EventBus::channel(16);
        let kinds = vec![
            agent(AgentEvent::Started {
                agent_id: "a1".into(),
                strategy: "chat".into(),
            }),
            EventKind::ReasoningCall(ReasoningCallEvent::After {
                responses: vec![Response::Assistant {
                    content: "hi".into(),
                }],
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                moderation: None,
            }),
            EventKind::ReasoningCall(ReasoningCallEvent::After {
                responses: vec![Response::Assistant {
                    content: "again".into(),
                }],
                usage: Usage {
                    input_tokens: 20,
                    output_tokens: 1,
                },
                moderation: None,
            }),
            agent(AgentEvent::Finished {
                agent_id: "a1".into(),
                result: serde_json::json!("again"),
            }),
            agent(AgentEvent::BeforeClose {
                agent_id: "a1".into(),
            }),
        ];
        for kind in kinds {
            tx.send(event(&run, kind)).await.unwrap();
        }

        let (mut sink, mut out) = ChannelSink::new(16);
        let cancel = CancellationToken::new();
        let summary = StreamingAdapter::new(run, cancel.clone())
            .forward(rx, &mut sink)
            .await;

        assert_eq!(summary.end, StreamEnd::Closed);
        assert_eq!(summary.forwarded, 4);
        assert_eq!(summary.usage.total_tokens(), 36);
        assert!(!cancel.is_cancelled());

        drop(sink);
        let mut names = Vec::new();
        while let Some(e) = out.recv().await {
            names.push(e.name());
        }
        assert_eq!(names, vec!["AgentStarted", "Message", "Message", "AgentFinished"]);
        // The adapter dropped its receiver after the root closed.
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_sub_run_close_does_not_end_the_stream() {
        let root = RunId::new();
        let branch = RunId::new();
        let (tx, rx) = EventBus::channel(16);
        let close = || {
            agent(AgentEvent::BeforeClose {
                agent_id: "a1".into(),
            })
        };
        tx.send(LifecycleEvent::new(branch, Some(root.clone()), close()))
            .await
            .unwrap();
        tx.send(event(
            &root,
            agent(AgentEvent::Finished {
                agent_id: "a1".into(),
                result: serde_json::Value::Null,
            }),
        ))
        .await
        .unwrap();
        tx.send(event(&root, close())).await.unwrap();

        let (mut sink, _out) = ChannelSink::new(16);
        let summary = StreamingAdapter::new(root, CancellationToken::new())
            .forward(rx, &mut sink)
            .await;

        assert_eq!(summary.end, StreamEnd::Closed);
        assert_eq!(summary.forwarded, 1);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_the_run() {
        let run = RunId::new();
        let (_tx, rx) = EventBus::channel(4);
        let (mut sink, out) = ChannelSink::new(4);
        drop(out);

        let cancel = CancellationToken::new();
        let summary = StreamingAdapter::new(run, cancel.clone())
            .forward(rx, &mut sink)
            .await;

        assert_eq!(summary.end, StreamEnd::Disconnected);
        assert_eq!(summary.forwarded, 0);
        assert!(cancel.is_cancelled());
    }
}
