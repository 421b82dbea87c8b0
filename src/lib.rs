// SPDX-License-Identifier: MIT

//! stategraph-rs - a state-machine execution model for conversational agents
//!
//! A conversation is a state record threaded through a fixed graph of named
//! nodes. Nodes read the state and return partial updates, per-field
//! reducers merge each update atomically, and router functions inspect the
//! merged state to pick the next node. The reserved [graph::START] and
//! [graph::END] names mark entry and exit.
//!
//! The [model::ChatModel] trait is the only contact point with a hosted
//! language model; [registry::ToolRegistry] holds the callable tools a
//! model may request. Two demo flows under [flows] wire these pieces into
//! an arithmetic agent and an image-crop agent with an approval loop.

pub mod agent;
pub mod error;
pub mod flows;
pub mod graph;
pub mod message;
pub mod model;
pub mod registry;
pub mod state;
pub mod tool;

pub use error::{FlowError, GraphError, ImageError, ModelError, ToolError};
pub use graph::{Graph, GraphBuilder, Node, Transition, END, START};
pub use message::{AssistantTurn, ImageData, Message, MessageLog, ToolCall};
pub use model::{ChatModel, GenerationConfig, ModelRequest, StructuredRequest};
pub use registry::ToolRegistry;
pub use state::SessionState;
pub use tool::{Tool, ToolDecl};
