use std::marker::PhantomData;
use std::sync::Arc;

use waypoint_core::types::{Response, ToolCall, ToolResult};

use super::value::{DynValue, StepData};

/// What an edge matches on. Recorded for validation and logging; the actual
/// test is the edge's matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCondition {
    /// Matches every output.
    Always,
    /// Matches a reasoning response that requests a tool.
    ToolCall,
    /// Matches a plain assistant answer.
    AssistantMessage,
    /// Matches a successful tool result.
    ToolSuccess,
    /// Matches a failed tool result.
    ToolFailure,
    /// Matches by a caller-supplied predicate on the output.
    Custom,
}

type Matcher<O, V> = Arc<dyn Fn(&O) -> Option<V> + Send + Sync>;
type ErasedMatcher = Arc<dyn Fn(&DynValue) -> Option<DynValue> + Send + Sync>;

/// A typed edge under construction from a node producing `O` to a node
/// consuming `T`. `V` is what the edge currently delivers; the graph only
/// accepts routes where `V == T`.
pub struct Route<O, V, T> {
    from: String,
    to: String,
    condition: EdgeCondition,
    guarded: bool,
    matcher: Matcher<O, V>,
    _target: PhantomData<fn(T)>,
}

impl<O: StepData, T> Route<O, O, T> {
    pub(crate) fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            condition: EdgeCondition::Always,
            guarded: false,
            matcher: Arc::new(|o: &O| Some(o.clone())),
            _target: PhantomData,
        }
    }
}

impl<O: 'static, V: 'static, T> Route<O, V, T> {
    fn refine<W: 'static>(
        self,
        condition: EdgeCondition,
        guarded: bool,
        f: impl Fn(V) -> Option<W> + Send + Sync + 'static,
    ) -> Route<O, W, T> {
        let prev = self.matcher;
        let condition = match (self.condition, condition) {
            (EdgeCondition::Always, next) => next,
            (current, EdgeCondition::Custom) => current,
            (_, next) => next,
        };
        Route {
            from: self.from,
            to: self.to,
            condition,
            guarded: self.guarded || guarded,
            matcher: Arc::new(move |o: &O| prev(o).and_then(&f)),
            _target: PhantomData,
        }
    }

    /// Only follow the edge when `pred` holds for the delivered value.
    pub fn on_condition(
        self,
        pred: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Route<O, V, T> {
        self.refine(EdgeCondition::Custom, true, move |v| {
            if pred(&v) {
                Some(v)
            } else {
                None
            }
        })
    }

    /// Map the delivered value before it reaches the target.
    pub fn transformed<W: 'static>(
        self,
        f: impl Fn(V) -> W + Send + Sync + 'static,
    ) -> Route<O, W, T> {
        let condition = self.condition;
        let mut route = self.refine(EdgeCondition::Custom, false, move |v| Some(f(v)));
        route.condition = condition;
        route
    }
}

impl<O: 'static, T> Route<O, Response, T> {
    /// Follow the edge for tool-call responses accepted by `pred`,
    /// delivering the call.
    pub fn on_tool_call(
        self,
        pred: impl Fn(&ToolCall) -> bool + Send + Sync + 'static,
    ) -> Route<O, ToolCall, T> {
        self.refine(EdgeCondition::ToolCall, true, move |r| match r {
            Response::ToolCall(call) if pred(&call) => Some(call),
            _ => None,
        })
    }

    /// Follow the edge for assistant answers accepted by `pred`,
    /// delivering the text.
    pub fn on_assistant_message(
        self,
        pred: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Route<O, String, T> {
        self.refine(EdgeCondition::AssistantMessage, true, move |r| match r {
            Response::Assistant { content } if pred(content.as_str()) => Some(content),
            _ => None,
        })
    }
}

impl<O: 'static, T> Route<O, ToolResult, T> {
    pub fn on_tool_success(self) -> Route<O, ToolResult, T> {
        self.refine(EdgeCondition::ToolSuccess, false, |r: ToolResult| {
            if r.is_failure() {
                None
            } else {
                Some(r)
            }
        })
    }

    pub fn on_tool_failure(self) -> Route<O, ToolResult, T> {
        self.refine(EdgeCondition::ToolFailure, false, |r: ToolResult| {
            if r.is_failure() {
                Some(r)
            } else {
                None
            }
        })
    }
}

impl<O: StepData, T: StepData> Route<O, T, T> {
    pub(crate) fn erase(self) -> Edge {
        let matcher = self.matcher;
        Edge {
            from: self.from,
            to: self.to,
            condition: self.condition,
            guarded: self.guarded,
            matcher: Arc::new(move |value: &DynValue| {
                value
                    .downcast_ref::<O>()
                    .and_then(|o| matcher(o))
                    .map(DynValue::new)
            }),
        }
    }
}

/// A built edge: type-erased, evaluated in declaration order.
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
    /// Whether a caller predicate narrows the condition.
    pub guarded: bool,
    matcher: ErasedMatcher,
}

impl Edge {
    /// The value to deliver if this edge matches `output`.
    pub(crate) fn evaluate(&self, output: &DynValue) -> Option<DynValue> {
        (self.matcher)(output)
    }

    /// Whether the edge accepts every failed tool result.
    pub(crate) fn accepts_all_tool_failures(&self) -> bool {
        !self.guarded
            && matches!(
                self.condition,
                EdgeCondition::Always | EdgeCondition::ToolFailure
            )
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition)
            .field("guarded", &self.guarded)
            .finish()
    }
}
