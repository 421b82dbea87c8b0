// SPDX-License-Identifier: MIT

//! Canonical nodes for conversational graphs
//!
//! [`CallModel`] asks the chat model for the next assistant turn,
//! [`CallTools`] answers that turn's tool calls through the registry, and
//! [`after_model_route`] is the routing rule that connects them.

use async_trait::async_trait;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::FlowError;
use crate::graph::{Node, Transition};
use crate::message::{Message, MessageLog};
use crate::model::{ChatModel, GenerationConfig, ModelRequest};
use crate::registry::ToolRegistry;
use crate::state::SessionState;
use crate::tool::ToolDecl;

/// Session states whose transcript the canonical nodes can drive
pub trait Conversation: SessionState {
    /// The transcript as recorded so far
    fn log(&self) -> &MessageLog;

    /// Feedback from a rejected earlier attempt, if the flow tracks one
    fn pending_feedback(&self) -> Option<&str> {
        None
    }

    /// Wrap freshly produced transcript entries into this state's update
    fn update_from_messages(messages: Vec<Message>) -> Self::Update;
}

/// Node that asks the chat model for the next assistant turn.
///
/// The tool declarations are captured from the registry at construction
/// time, so the advertised tool set stays fixed for the graph's lifetime.
pub struct CallModel<S> {
    model: Arc<dyn ChatModel>,
    directive: String,
    declarations: Vec<ToolDecl>,
    config: Option<GenerationConfig>,
    _state: PhantomData<fn() -> S>,
}

impl<S> CallModel<S> {
    pub fn new(
        model: Arc<dyn ChatModel>,
        directive: impl Into<String>,
        registry: &ToolRegistry,
    ) -> Self {
        Self {
            model,
            directive: directive.into(),
            declarations: registry.declarations(),
            config: None,
            _state: PhantomData,
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[async_trait]
impl<S: Conversation> Node<S> for CallModel<S> {
    async fn run(&self, state: &S) -> Result<S::Update, FlowError> {
        let transcript = state.log();
        transcript.verify_tool_correlation()?;

        let directive = match state.pending_feedback() {
            Some(feedback) => format!(
                "{}\n\nThe previous attempt was rejected: {}. Address the feedback this time.",
                self.directive, feedback
            ),
            None => self.directive.clone(),
        };

        let reply = self
            .model
            .complete(ModelRequest {
                directive: &directive,
                log: transcript,
                tools: &self.declarations,
                config: self.config.as_ref(),
            })
            .await?;

        log::debug!("Model replied with {} tool call(s)", reply.tool_calls.len());
        Ok(S::update_from_messages(vec![Message::Assistant(reply)]))
    }
}

/// Node that answers the pending tool calls through the registry
pub struct CallTools<S> {
    registry: Arc<ToolRegistry>,
    _state: PhantomData<fn() -> S>,
}

impl<S> CallTools<S> {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S: Conversation> Node<S> for CallTools<S> {
    async fn run(&self, state: &S) -> Result<S::Update, FlowError> {
        let results = execute_tool_calls(state.log(), &self.registry).await?;
        Ok(S::update_from_messages(results))
    }
}

/// Answer every tool call in the latest assistant turn, in request order.
///
/// Tool failures do not abort the run; they come back as error-flagged
/// result entries so the model can read the reason and react. Reaching
/// this point without a pending tool call is a protocol violation.
pub async fn execute_tool_calls(
    log: &MessageLog,
    registry: &ToolRegistry,
) -> Result<Vec<Message>, FlowError> {
    let turn = match log.latest().and_then(Message::as_assistant) {
        Some(turn) if turn.has_tool_calls() => turn,
        _ => {
            return Err(FlowError::protocol(
                "tool node reached without a pending tool call",
            ))
        }
    };

    let mut seen = HashSet::new();
    for call in &turn.tool_calls {
        if !seen.insert(call.id.as_str()) {
            return Err(FlowError::protocol(format!(
                "duplicate tool call id '{}' in one assistant turn",
                call.id
            )));
        }
    }

    let mut results = Vec::with_capacity(turn.tool_calls.len());
    for call in &turn.tool_calls {
        match registry.invoke(&call.name, call.args.clone()).await {
            Ok(payload) => {
                log::info!("Tool '{}' answered call {}", call.name, call.id);
                results.push(Message::tool_result(&call.id, &call.name, payload));
            }
            Err(err) => {
                log::warn!("Tool '{}' failed: {}", call.name, err);
                results.push(Message::tool_error(&call.id, &call.name, err.to_string()));
            }
        }
    }
    Ok(results)
}

/// Standard routing rule after a model turn.
///
/// Tool calls go to `tools`; a plain reply goes to `eval` when the flow
/// has an evaluation stage, otherwise the run ends. A transcript that does
/// not end in an assistant turn ends the run as the safe default.
pub fn after_model_route(log: &MessageLog, tools: &str, eval: Option<&str>) -> Transition {
    match log.latest().and_then(Message::as_assistant) {
        Some(turn) if turn.has_tool_calls() => Transition::to(tools),
        Some(_) => match eval {
            Some(eval) => Transition::to(eval),
            None => Transition::End,
        },
        None => Transition::End,
    }
}
