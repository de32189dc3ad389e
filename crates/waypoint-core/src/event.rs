use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, WaypointError};
use crate::types::{ChatMessage, Moderation, Response, RunId, Usage};

/// A structured notification of something that happened during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub run_id: RunId,
    /// Set for sub-runs launched by a parallel step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl LifecycleEvent {
    pub fn new(run_id: RunId, parent_run_id: Option<RunId>, kind: EventKind) -> Self {
        Self {
            run_id,
            parent_run_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_run_id.is_none()
    }

    pub fn is_before_close(&self) -> bool {
        matches!(self.kind, EventKind::Agent(AgentEvent::BeforeClose { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "event")]
pub enum EventKind {
    Agent(AgentEvent),
    Strategy(StrategyEvent),
    Node(NodeEvent),
    ReasoningCall(ReasoningCallEvent),
    Tool(ToolEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    Started {
        agent_id: String,
        strategy: String,
    },
    Finished {
        agent_id: String,
        result: serde_json::Value,
    },
    RunError {
        agent_id: String,
        error: String,
    },
    /// Always the last event of a run.
    BeforeClose {
        agent_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StrategyEvent {
    Started {
        strategy: String,
    },
    Finished {
        strategy: String,
        result: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    Before {
        node: String,
        input: serde_json::Value,
    },
    After {
        node: String,
        input: serde_json::Value,
        output: serde_json::Value,
    },
    ExecutionError {
        node: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReasoningCallEvent {
    Before {
        prompt: Vec<ChatMessage>,
        model: String,
        tools: Vec<String>,
    },
    After {
        responses: Vec<Response>,
        usage: Usage,
        #[serde(default)]
        moderation: Option<Moderation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolEvent {
    Call {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    ValidationError {
        call_id: String,
        tool: String,
        args: serde_json::Value,
        error: String,
    },
    CallFailure {
        call_id: String,
        tool: String,
        args: serde_json::Value,
        error: String,
    },
    CallResult {
        call_id: String,
        tool: String,
        args: serde_json::Value,
        result: serde_json::Value,
    },
}

impl EventKind {
    /// Dotted name such as `Agent.Started`, used in logs and assertions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Agent(e) => match e {
                AgentEvent::Started { .. } => "Agent.Started",
                AgentEvent::Finished { .. } => "Agent.Finished",
                AgentEvent::RunError { .. } => "Agent.RunError",
                AgentEvent::BeforeClose { .. } => "Agent.BeforeClose",
            },
            Self::Strategy(e) => match e {
                StrategyEvent::Started { .. } => "Strategy.Started",
                StrategyEvent::Finished { .. } => "Strategy.Finished",
            },
            Self::Node(e) => match e {
                NodeEvent::Before { .. } => "Node.Before",
                NodeEvent::After { .. } => "Node.After",
                NodeEvent::ExecutionError { .. } => "Node.ExecutionError",
            },
            Self::ReasoningCall(e) => match e {
                ReasoningCallEvent::Before { .. } => "ReasoningCall.Before",
                ReasoningCallEvent::After { .. } => "ReasoningCall.After",
            },
            Self::Tool(e) => match e {
                ToolEvent::Call { .. } => "Tool.Call",
                ToolEvent::ValidationError { .. } => "Tool.ValidationError",
                ToolEvent::CallFailure { .. } => "Tool.CallFailure",
                ToolEvent::CallResult { .. } => "Tool.CallResult",
            },
        }
    }

    /// Agent.Finished or Agent.RunError.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Agent(AgentEvent::Finished { .. }) | Self::Agent(AgentEvent::RunError { .. })
        )
    }
}

/// Ordered lifecycle event channel. The engine is the only producer and
/// exactly one consumer drains it.
pub struct EventBus;

impl EventBus {
    /// Create a bounded bus. Producers suspend while the buffer is full;
    /// events are never dropped.
    pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventSender { tx }, EventReceiver { rx })
    }
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl EventSender {
    pub async fn send(&self, event: LifecycleEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| WaypointError::SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<LifecycleEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(kind: AgentEvent) -> EventKind {
        EventKind::Agent(kind)
    }

    #[tokio::test]
    async fn test_bus_preserves_order() {
        let (tx, mut rx) = EventBus::channel(2);
        let run = RunId::new();
        let producer = {
            let run = run.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    let kind = EventKind::Node(NodeEvent::Before {
                        node: format!("n{}", i),
                        input: serde_json::Value::Null,
                    });
                    tx.send(LifecycleEvent::new(run.clone(), None, kind))
                        .await
                        .unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let EventKind::Node(NodeEvent::Before { node, .. }) = event.kind {
                seen.push(node);
            }
        }
        producer.await.unwrap();
        let expected: Vec<String> = (0..10).map(|i| format!("n{}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (tx, rx) = EventBus::channel(4);
        drop(rx);
        let event = LifecycleEvent::new(
            RunId::new(),
            None,
            agent(AgentEvent::BeforeClose {
                agent_id: "a".into(),
            }),
        );
        assert!(matches!(
            tx.send(event).await,
            Err(WaypointError::SinkClosed)
        ));
    }

    #[test]
    fn test_every_variant_has_a_distinct_name() {
        let v = serde_json::Value::Null;
        let all = vec![
            agent(AgentEvent::Started { agent_id: "a".into(), strategy: "s".into() }),
            agent(AgentEvent::Finished { agent_id: "a".into(), result: v.clone() }),
            agent(AgentEvent::RunError { agent_id: "a".into(), error: "e".into() }),
            agent(AgentEvent::BeforeClose { agent_id: "a".into() }),
            EventKind::Strategy(StrategyEvent::Started { strategy: "s".into() }),
            EventKind::Strategy(StrategyEvent::Finished { strategy: "s".into(), result: v.clone() }),
            EventKind::Node(NodeEvent::Before { node: "n".into(), input: v.clone() }),
            EventKind::Node(NodeEvent::After { node: "n".into(), input: v.clone(), output: v.clone() }),
            EventKind::Node(NodeEvent::ExecutionError { node: "n".into(), error: "e".into() }),
            EventKind::ReasoningCall(ReasoningCallEvent::Before { prompt: vec![], model: "m".into(), tools: vec![] }),
            EventKind::ReasoningCall(ReasoningCallEvent::After { responses: vec![], usage: Usage::default(), moderation: None }),
            EventKind::Tool(ToolEvent::Call { call_id: "c".into(), tool: "t".into(), args: v.clone() }),
            EventKind::Tool(ToolEvent::ValidationError { call_id: "c".into(), tool: "t".into(), args: v.clone(), error: "e".into() }),
            EventKind::Tool(ToolEvent::CallFailure { call_id: "c".into(), tool: "t".into(), args: v.clone(), error: "e".into() }),
            EventKind::Tool(ToolEvent::CallResult { call_id: "c".into(), tool: "t".into(), args: v.clone(), result: v }),
        ];
        let mut names: Vec<&str> = all.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 15);
        assert_eq!(all.iter().filter(|k| k.is_terminal()).count(), 2);
    }

    #[test]
    fn test_event_serializes_with_family_tag() {
        let event = LifecycleEvent::new(
            RunId::from_string("r1"),
            None,
            EventKind::Tool(ToolEvent::Call {
                call_id: "c1".into(),
                tool: "getWeather".into(),
                args: serde_json::json!({"latitude": 1.0}),
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["kind"]["family"], "Tool");
        assert_eq!(json["kind"]["event"]["type"], "Call");
        assert!(json.get("parent_run_id").is_none());

        let back: LifecycleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, event.kind);
    }
}
