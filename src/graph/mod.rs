// SPDX-License-Identifier: MIT

//! Graph core - named nodes stepping over a shared session state
//!
//! A graph is built with [`GraphBuilder`], validated once by
//! [`GraphBuilder::compile`], and then driven by [`Graph::run`]. Each step
//! runs one node against a read-only view of the state and folds the
//! returned update back in before the next transition is resolved.

pub mod builder;
pub mod executor;

pub use builder::{Graph, GraphBuilder};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::FlowError;
use crate::state::SessionState;

/// Virtual entry point; not a runnable node
pub const START: &str = "__start__";
/// Virtual exit; reaching it finishes the run
pub const END: &str = "__end__";

/// A routing decision made after a node finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Hand control to the named node
    To(String),
    /// Finish the run
    End,
}

impl Transition {
    pub fn to(name: impl Into<String>) -> Self {
        Transition::To(name.into())
    }
}

/// A unit of work in the graph.
///
/// Nodes never mutate the state directly; they describe the change as an
/// update and the executor applies it, so a failed node leaves the state
/// untouched.
#[async_trait]
pub trait Node<S: SessionState>: Send + Sync {
    async fn run(&self, state: &S) -> Result<S::Update, FlowError>;
}

/// Picks the successor of a node from the state after its update landed
pub type Router<S> = Arc<dyn Fn(&S) -> Transition + Send + Sync>;
