use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use waypoint_core::error::{GraphError, Result};

use super::edge::{Edge, Route};
use super::node::{erase, ErasedStep, NodeHandle};
use super::value::StepData;
use super::{Graph, GraphInner, FINISH_NODE, START_NODE};
use crate::step::{Passthrough, Step, StepKind};

/// Assembles a [`Graph`] from steps and typed routes.
///
/// Structural problems (duplicate names, dangling edges, unreachable or
/// dead-end nodes) are reported by [`build`](Self::build), never at run time.
pub struct GraphBuilder<I, O> {
    name: String,
    nodes: HashMap<String, Arc<dyn ErasedStep>>,
    order: Vec<String>,
    edges: Vec<Edge>,
    finish: Vec<String>,
    errors: Vec<GraphError>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: StepData, O: StepData> GraphBuilder<I, O> {
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self {
            name: name.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            finish: vec![FINISH_NODE.to_string()],
            errors: Vec::new(),
            _marker: PhantomData,
        };
        builder.insert(erase(Passthrough::<I>::new(START_NODE)));
        builder.insert(erase(Passthrough::<O>::new(FINISH_NODE)));
        builder
    }

    fn insert(&mut self, step: Arc<dyn ErasedStep>) {
        let name = step.name().to_string();
        if self.nodes.contains_key(&name) {
            self.errors.push(GraphError::DuplicateNode(name));
            return;
        }
        self.order.push(name.clone());
        self.nodes.insert(name, step);
    }

    /// Add a step and get a typed handle for wiring edges.
    pub fn add_node<S: Step>(&mut self, step: S) -> NodeHandle<S::Input, S::Output> {
        let handle = NodeHandle::new(step.name());
        self.insert(erase(step));
        handle
    }

    /// The virtual start node. Receives the graph input.
    pub fn start(&self) -> NodeHandle<I, I> {
        NodeHandle::new(START_NODE)
    }

    /// The default finish node. Whatever reaches it is the graph output.
    pub fn finish(&self) -> NodeHandle<O, O> {
        NodeHandle::new(FINISH_NODE)
    }

    /// Declare an additional finish node; its output is the graph output.
    pub fn mark_finish<X>(&mut self, node: &NodeHandle<X, O>) -> &mut Self {
        if !self.finish.iter().any(|n| n == node.name()) {
            self.finish.push(node.name().to_string());
        }
        self
    }

    /// Add an edge. Edges leaving one node are tried in the order added.
    pub fn edge<N: StepData, T: StepData>(&mut self, route: Route<N, T, T>) -> &mut Self {
        self.edges.push(route.erase());
        self
    }

    pub fn build(self) -> Result<Graph<I, O>> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err.into());
        }

        let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(GraphError::UnknownNode(endpoint.clone()).into());
                }
            }
            outgoing.entry(edge.from.clone()).or_default().push(edge);
        }

        let finish: HashSet<String> = self.finish.into_iter().collect();

        // Finish nodes end the walk, so their outgoing edges are never followed.
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([START_NODE]);
        while let Some(node) = queue.pop_front() {
            if !reachable.insert(node) || finish.contains(node) {
                continue;
            }
            for edge in outgoing.get(node).into_iter().flatten() {
                queue.push_back(edge.to.as_str());
            }
        }

        for name in &self.order {
            if finish.contains(name) {
                continue;
            }
            if !reachable.contains(name.as_str()) {
                return Err(GraphError::Unreachable(name.clone()).into());
            }
            let edges = outgoing.get(name).map(Vec::as_slice).unwrap_or_default();
            if edges.is_empty() {
                return Err(GraphError::MissingEdge(name.clone()).into());
            }
            let is_tool_node = self
                .nodes
                .get(name)
                .is_some_and(|n| n.kind() == StepKind::ToolExecution);
            if is_tool_node && !edges.iter().any(Edge::accepts_all_tool_failures) {
                return Err(GraphError::UnhandledToolFailure(name.clone()).into());
            }
        }

        if !finish.iter().any(|f| reachable.contains(f.as_str())) {
            return Err(GraphError::FinishUnreachable(self.name).into());
        }

        debug!(
            graph = %self.name,
            nodes = self.nodes.len(),
            edges = outgoing.values().map(Vec::len).sum::<usize>(),
            "Graph built"
        );

        Ok(Graph {
            inner: Arc::new(GraphInner {
                name: self.name,
                nodes: self.nodes,
                edges: outgoing,
                finish,
            }),
            _marker: PhantomData,
        })
    }
}
