//! Graph execution loop

use super::builder::{Exit, Graph};
use super::{Transition, END, START};
use crate::error::FlowError;
use crate::state::SessionState;

impl<S: SessionState> Graph<S> {
    /// Cap the number of node executions for one run
    pub fn with_step_limit(mut self, limit: u32) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Drive the graph from `START` until a transition reaches `END`.
    ///
    /// Each step runs one node, applies its update atomically, then
    /// resolves the node's exit against the post-update state.
    pub async fn run(&self, mut state: S) -> Result<S, FlowError> {
        let mut current = match self.resolve_exit(START, &state)? {
            Transition::To(name) => name,
            Transition::End => return Ok(state),
        };
        let mut steps: u32 = 0;

        loop {
            if let Some(limit) = self.step_limit {
                if steps >= limit {
                    return Err(FlowError::StepLimit { limit });
                }
            }
            steps += 1;

            let node = match self.nodes.get(&current) {
                Some(node) => node,
                None => {
                    return Err(FlowError::other(format!(
                        "node '{}' disappeared from a compiled graph",
                        current
                    )))
                }
            };

            log::info!("Step {}: running node '{}'", steps, current);
            let update = node.run(&state).await?;
            state.apply(update);

            current = match self.resolve_exit(&current, &state)? {
                Transition::To(name) => name,
                Transition::End => return Ok(state),
            };
        }
    }

    fn resolve_exit(&self, from: &str, state: &S) -> Result<Transition, FlowError> {
        let exit = match self.exits.get(from) {
            Some(exit) => exit,
            None => {
                return Err(FlowError::other(format!(
                    "node '{}' has no exit in a compiled graph",
                    from
                )))
            }
        };

        match exit {
            Exit::Fixed(to) => Ok(transition_for(to)),
            Exit::Conditional { router, allowed } => {
                let decision = router(state);
                let target = match &decision {
                    Transition::To(name) => name.as_str(),
                    Transition::End => END,
                };
                if !allowed.iter().any(|a| a == target) {
                    return Err(FlowError::UndeclaredEdge {
                        from: from.to_string(),
                        to: target.to_string(),
                    });
                }
                log::debug!("Router at '{}' chose '{}'", from, target);
                Ok(transition_for(target))
            }
        }
    }
}

fn transition_for(to: &str) -> Transition {
    if to == END {
        Transition::End
    } else {
        Transition::To(to.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FlowError;
    use crate::graph::{GraphBuilder, Node, Transition, END, START};
    use crate::state::SessionState;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct TraceState {
        visits: Vec<String>,
    }

    impl SessionState for TraceState {
        type Update = Vec<String>;

        fn apply(&mut self, update: Vec<String>) {
            self.visits.extend(update);
        }
    }

    struct RecordNode(&'static str);

    #[async_trait]
    impl Node<TraceState> for RecordNode {
        async fn run(&self, _state: &TraceState) -> Result<Vec<String>, FlowError> {
            Ok(vec![self.0.to_string()])
        }
    }

    #[tokio::test]
    async fn test_linear_run_visits_in_order() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_node("b", RecordNode("b"))
            .add_edge(START, "a")
            .add_edge("a", "b")
            .add_edge("b", END)
            .compile()
            .unwrap();

        let state = graph.run(TraceState::default()).await.unwrap();
        assert_eq!(state.visits, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_conditional_loops_until_done() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_edge(START, "a")
            .add_conditional_edge(
                "a",
                |state: &TraceState| {
                    if state.visits.len() < 3 {
                        Transition::to("a")
                    } else {
                        Transition::End
                    }
                },
                &["a", END],
            )
            .compile()
            .unwrap();

        let state = graph.run(TraceState::default()).await.unwrap();
        assert_eq!(state.visits.len(), 3);
    }

    #[tokio::test]
    async fn test_step_limit_stops_a_cycle() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_edge(START, "a")
            .add_edge("a", "a")
            .compile()
            .unwrap()
            .with_step_limit(5);

        let err = graph.run(TraceState::default()).await.unwrap_err();
        match err {
            FlowError::StepLimit { limit } => assert_eq!(limit, 5),
            other => panic!("expected step limit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undeclared_route_is_rejected() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_node("b", RecordNode("b"))
            .add_edge(START, "a")
            .add_conditional_edge("a", |_: &TraceState| Transition::to("b"), &[END])
            .add_edge("b", END)
            .compile()
            .unwrap();

        let err = graph.run(TraceState::default()).await.unwrap_err();
        match err {
            FlowError::UndeclaredEdge { from, to } => {
                assert_eq!(from, "a");
                assert_eq!(to, "b");
            }
            other => panic!("expected undeclared edge error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undeclared_end_is_rejected_too() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_node("b", RecordNode("b"))
            .add_edge(START, "a")
            .add_conditional_edge("a", |_: &TraceState| Transition::End, &["b"])
            .add_edge("b", END)
            .compile()
            .unwrap();

        let err = graph.run(TraceState::default()).await.unwrap_err();
        assert!(matches!(err, FlowError::UndeclaredEdge { .. }));
    }

    #[tokio::test]
    async fn test_conditional_entry_routes_by_state() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_conditional_edge(START, |_: &TraceState| Transition::to("a"), &["a", END])
            .add_edge("a", END)
            .compile()
            .unwrap();

        let state = graph.run(TraceState::default()).await.unwrap();
        assert_eq!(state.visits, vec!["a"]);
    }

    #[tokio::test]
    async fn test_entry_may_finish_immediately() {
        let graph = GraphBuilder::new()
            .add_node("a", RecordNode("a"))
            .add_conditional_edge(START, |_: &TraceState| Transition::End, &[END])
            .add_edge("a", END)
            .compile()
            .unwrap();

        let state = graph.run(TraceState::default()).await.unwrap();
        assert!(state.visits.is_empty());
    }
}
