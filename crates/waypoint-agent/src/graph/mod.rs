//! Typed orchestration graphs.
//!
//! A graph is a set of steps joined by ordered, conditional edges, with one
//! virtual start node and one or more finish nodes. Cycles are allowed: a
//! run ends when it reaches a finish node, fails, or is cancelled.
//!
//! Node and edge types are checked when the graph is assembled; the built
//! graph stores them erased so heterogeneous steps can share one walker.

pub mod builder;
pub mod edge;
pub mod node;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

pub use builder::GraphBuilder;
pub use edge::{Edge, EdgeCondition, Route};
pub use node::NodeHandle;
pub use value::{DynValue, StepData};

use node::ErasedStep;

pub const START_NODE: &str = "__start__";
pub const FINISH_NODE: &str = "__finish__";

pub(crate) struct GraphInner {
    pub(crate) name: String,
    pub(crate) nodes: HashMap<String, Arc<dyn ErasedStep>>,
    pub(crate) edges: HashMap<String, Vec<Edge>>,
    pub(crate) finish: HashSet<String>,
}

impl GraphInner {
    pub(crate) fn node(&self, name: &str) -> Option<&Arc<dyn ErasedStep>> {
        self.nodes.get(name)
    }

    pub(crate) fn outgoing(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn is_finish(&self, name: &str) -> bool {
        self.finish.contains(name)
    }
}

/// A validated graph taking `I` and producing `O`. Cheap to clone.
pub struct Graph<I, O> {
    pub(crate) inner: Arc<GraphInner>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Graph<I, O> {
    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Names of all nodes, including the virtual start and finish nodes.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Outgoing edges of `node`, in evaluation order.
    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.inner.outgoing(node)
    }

    pub fn is_finish(&self, node: &str) -> bool {
        self.inner.is_finish(node)
    }
}

impl<I, O> Clone for Graph<I, O> {
    fn clone(&self) -> Self {
        Self::from_inner(self.inner.clone())
    }
}

impl<I, O> std::fmt::Debug for Graph<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.inner.name)
            .field("nodes", &self.node_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ExecuteTool, Transform};
    use waypoint_core::error::{GraphError, WaypointError};
    use waypoint_core::types::{ToolCall, ToolResult};

    fn upper() -> Transform<String, String> {
        Transform::new("upper", |s: String| s.to_uppercase())
    }

    fn graph_error<T: std::fmt::Debug>(result: waypoint_core::Result<T>) -> GraphError {
        match result {
            Err(WaypointError::Graph(e)) => e,
            other => panic!("expected graph error, got {:?}", other),
        }
    }

    #[test]
    fn test_linear_graph_builds() {
        let mut g = GraphBuilder::<String, String>::new("linear");
        let up = g.add_node(upper());
        g.edge(g.start().to(&up));
        g.edge(up.to(&g.finish()));
        let graph = g.build().unwrap();
        assert_eq!(graph.name(), "linear");
        assert_eq!(graph.node_names(), vec![FINISH_NODE, START_NODE, "upper"]);
        assert_eq!(graph.edges_from("upper").len(), 1);
    }

    #[test]
    fn test_node_without_outgoing_edge_fails() {
        let mut g = GraphBuilder::<String, String>::new("dead-end");
        let up = g.add_node(upper());
        let other = g.add_node(Transform::new("lower", |s: String| s.to_lowercase()));
        g.edge(g.start().to(&up));
        g.edge(up.to(&g.finish()).on_condition(|s| s.is_empty()));
        g.edge(up.to(&other));
        assert_eq!(
            graph_error(g.build()),
            GraphError::MissingEdge("lower".into())
        );
    }

    #[test]
    fn test_unreachable_node_fails() {
        let mut g = GraphBuilder::<String, String>::new("island");
        let up = g.add_node(upper());
        let lonely = g.add_node(Transform::new("lonely", |s: String| s));
        g.edge(g.start().to(&up));
        g.edge(up.to(&g.finish()));
        g.edge(lonely.to(&g.finish()));
        assert_eq!(
            graph_error(g.build()),
            GraphError::Unreachable("lonely".into())
        );
    }

    #[test]
    fn test_duplicate_node_fails() {
        let mut g = GraphBuilder::<String, String>::new("dupes");
        let a = g.add_node(upper());
        let _b = g.add_node(upper());
        g.edge(g.start().to(&a));
        g.edge(a.to(&g.finish()));
        assert_eq!(
            graph_error(g.build()),
            GraphError::DuplicateNode("upper".into())
        );
    }

    #[test]
    fn test_unknown_endpoint_fails() {
        let mut other = GraphBuilder::<String, String>::new("other");
        let foreign = other.add_node(Transform::new("foreign", |s: String| s));

        let mut g = GraphBuilder::<String, String>::new("main");
        g.edge(g.start().to(&g.finish()));
        g.edge(g.start().to(&foreign));
        assert_eq!(
            graph_error(g.build()),
            GraphError::UnknownNode("foreign".into())
        );
    }

    #[test]
    fn test_cycle_without_exit_fails() {
        let mut g = GraphBuilder::<String, String>::new("loop");
        let a = g.add_node(Transform::new("a", |s: String| s));
        let b = g.add_node(Transform::new("b", |s: String| s));
        g.edge(g.start().to(&a));
        g.edge(a.to(&b));
        g.edge(b.to(&a));
        assert_eq!(
            graph_error(g.build()),
            GraphError::FinishUnreachable("loop".into())
        );
    }

    #[test]
    fn test_tool_node_must_handle_failures() {
        let mut g = GraphBuilder::<ToolCall, ToolResult>::new("tools");
        let exec = g.add_node(ExecuteTool::new("exec"));
        g.edge(g.start().to(&exec));
        g.edge(exec.to(&g.finish()).on_tool_success());
        assert_eq!(
            graph_error(g.build()),
            GraphError::UnhandledToolFailure("exec".into())
        );

        let mut g = GraphBuilder::<ToolCall, ToolResult>::new("tools");
        let exec = g.add_node(ExecuteTool::new("exec"));
        g.edge(g.start().to(&exec));
        g.edge(exec.to(&g.finish()).on_tool_success());
        g.edge(exec.to(&g.finish()).on_tool_failure());
        assert!(g.build().is_ok());
    }

    #[test]
    fn test_marked_finish_node() {
        let mut g = GraphBuilder::<String, String>::new("early-exit");
        let up = g.add_node(upper());
        g.edge(g.start().to(&up));
        g.mark_finish(&up);
        let graph = g.build().unwrap();
        assert!(graph.is_finish("upper"));
        assert!(graph.is_finish(FINISH_NODE));
    }
}
