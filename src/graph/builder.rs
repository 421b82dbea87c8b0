// SPDX-License-Identifier: MIT

//! Graph construction and structural validation

use std::collections::HashMap;
use std::sync::Arc;

use super::{Node, Router, Transition, END, START};
use crate::error::GraphError;
use crate::state::SessionState;

/// Where control flows after a node finishes
pub(crate) enum Exit<S: SessionState> {
    /// Always the same successor
    Fixed(String),
    /// A router picks among the declared successors
    Conditional {
        router: Router<S>,
        allowed: Vec<String>,
    },
}

/// Collects nodes and edges for a [`Graph`].
///
/// Nothing is checked while building; every structural rule is enforced
/// once in [`GraphBuilder::compile`] so misconfiguration surfaces before
/// any node runs.
pub struct GraphBuilder<S: SessionState> {
    nodes: Vec<(String, Arc<dyn Node<S>>)>,
    exits: Vec<(String, Exit<S>)>,
}

impl<S: SessionState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            exits: Vec::new(),
        }
    }

    /// Register a named node
    pub fn add_node(mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    /// Add a fixed edge; `START` is a valid source and `END` a valid target
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.exits.push((from.into(), Exit::Fixed(to.into())));
        self
    }

    /// Add a routed edge; at runtime the router's choice must be one of
    /// `allowed` or the run fails
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        router: impl Fn(&S) -> Transition + Send + Sync + 'static,
        allowed: &[&str],
    ) -> Self {
        self.exits.push((
            from.into(),
            Exit::Conditional {
                router: Arc::new(router),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            },
        ));
        self
    }

    /// Validate the collected structure and freeze it
    pub fn compile(self) -> Result<Graph<S>, GraphError> {
        let mut nodes: HashMap<String, Arc<dyn Node<S>>> = HashMap::new();
        for (name, node) in self.nodes {
            if name == START || name == END {
                return Err(GraphError::ReservedName(name));
            }
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode(name));
            }
        }

        let mut exits: HashMap<String, Exit<S>> = HashMap::new();
        for (from, exit) in self.exits {
            if from != START && !nodes.contains_key(&from) {
                return Err(GraphError::UnknownNode(from));
            }
            match &exit {
                Exit::Fixed(to) => {
                    if to != END && !nodes.contains_key(to) {
                        return Err(GraphError::UnknownNode(to.clone()));
                    }
                }
                Exit::Conditional { allowed, .. } => {
                    if allowed.is_empty() {
                        return Err(GraphError::EmptyRouteSet(from));
                    }
                    for target in allowed {
                        if target != END && !nodes.contains_key(target) {
                            return Err(GraphError::UnknownNode(target.clone()));
                        }
                    }
                }
            }
            if exits.insert(from.clone(), exit).is_some() {
                return Err(GraphError::ConflictingExit(from));
            }
        }

        if !exits.contains_key(START) {
            return Err(GraphError::MissingEntry);
        }
        for name in nodes.keys() {
            if !exits.contains_key(name) {
                return Err(GraphError::MissingExit(name.clone()));
            }
        }

        Ok(Graph {
            nodes,
            exits,
            step_limit: None,
        })
    }
}

impl<S: SessionState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled, immutable node graph
pub struct Graph<S: SessionState> {
    pub(crate) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(crate) exits: HashMap<String, Exit<S>>,
    pub(crate) step_limit: Option<u32>,
}

impl<S: SessionState> std::fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("exits", &self.exits.keys().collect::<Vec<_>>())
            .field("step_limit", &self.step_limit)
            .finish()
    }
}
