//! Calculator flow - a single-agent tool loop
//!
//! The model answers arithmetic questions with an add and a square root
//! tool, cycling through the tool node until it produces a plain reply.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::agent::{after_model_route, CallModel, CallTools, Conversation};
use crate::error::{GraphError, ToolError};
use crate::graph::{Graph, GraphBuilder, END, START};
use crate::message::{Message, MessageLog};
use crate::model::ChatModel;
use crate::registry::ToolRegistry;
use crate::state::SessionState;
use crate::tool::Tool;

pub const CALCULATOR_DIRECTIVE: &str = "You are a careful calculator assistant. \
    Use the add and sqrt tools for arithmetic instead of computing in your head, \
    then state the result in one short sentence.";

/// State of one calculator session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub messages: MessageLog,
}

/// Update produced by one calculator step
#[derive(Debug, Default)]
pub struct ChatUpdate {
    pub messages: Vec<Message>,
}

impl SessionState for ChatState {
    type Update = ChatUpdate;

    fn apply(&mut self, update: ChatUpdate) {
        self.messages.append(update.messages);
    }
}

impl Conversation for ChatState {
    fn log(&self) -> &MessageLog {
        &self.messages
    }

    fn update_from_messages(messages: Vec<Message>) -> ChatUpdate {
        ChatUpdate { messages }
    }
}

impl ChatState {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        let mut messages = MessageLog::new();
        messages.push(Message::human(prompt));
        Self { messages }
    }

    /// Text of the closing assistant reply, once the run has one
    pub fn final_reply(&self) -> Option<&str> {
        match self.messages.latest().and_then(Message::as_assistant) {
            Some(turn) if !turn.has_tool_calls() => Some(turn.text.as_str()),
            _ => None,
        }
    }
}

static ADD_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "number", "description": "First addend" },
            "b": { "type": "number", "description": "Second addend" }
        },
        "required": ["a", "b"]
    })
});

#[derive(Deserialize)]
struct AddArgs {
    a: f64,
    b: f64,
}

/// Adds two numbers
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return their sum"
    }

    fn schema(&self) -> &Value {
        &ADD_SCHEMA
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: AddArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("add", vec![e.to_string()]))?;
        Ok(json!({ "result": args.a + args.b }))
    }
}

static SQRT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "x": { "type": "number", "description": "Number to take the root of" }
        },
        "required": ["x"]
    })
});

#[derive(Deserialize)]
struct SqrtArgs {
    x: f64,
}

/// Square root; negative input is a recoverable failure
pub struct SqrtTool;

#[async_trait]
impl Tool for SqrtTool {
    fn name(&self) -> &str {
        "sqrt"
    }

    fn description(&self) -> &str {
        "Return the square root of a non-negative number"
    }

    fn schema(&self) -> &Value {
        &SQRT_SCHEMA
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: SqrtArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("sqrt", vec![e.to_string()]))?;
        if args.x < 0.0 {
            return Err(ToolError::execution(
                "sqrt",
                format!("cannot take the square root of {}", args.x),
            ));
        }
        Ok(json!({ "result": args.x.sqrt() }))
    }
}

/// Register the calculator tool set
pub fn calculator_tools(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Arc::new(AddTool))?;
    registry.register(Arc::new(SqrtTool))?;
    Ok(())
}

/// The calculator graph: one agent node cycling through its tool node
pub fn calculator_graph(
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
) -> Result<Graph<ChatState>, GraphError> {
    let agent: CallModel<ChatState> = CallModel::new(model, CALCULATOR_DIRECTIVE, &registry);
    let tools: CallTools<ChatState> = CallTools::new(registry);

    GraphBuilder::new()
        .add_node("agent", agent)
        .add_node("tools", tools)
        .add_edge(START, "agent")
        .add_conditional_edge(
            "agent",
            |state: &ChatState| after_model_route(&state.messages, "tools", None),
            &["tools", END],
        )
        .add_edge("tools", "agent")
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::message::AssistantTurn;
    use crate::model::{ModelRequest, StructuredRequest};

    struct NullModel;

    #[async_trait]
    impl ChatModel for NullModel {
        async fn complete(&self, _request: ModelRequest<'_>) -> Result<AssistantTurn, ModelError> {
            Ok(AssistantTurn::default())
        }

        async fn complete_structured(
            &self,
            _request: StructuredRequest<'_>,
        ) -> Result<Value, ModelError> {
            Err(ModelError::invalid_response("not scripted"))
        }
    }

    #[tokio::test]
    async fn test_add_tool() {
        let result = AddTool.execute(json!({"a": 3.0, "b": 4.0})).await.unwrap();
        assert_eq!(result["result"], 7.0);
    }

    #[tokio::test]
    async fn test_sqrt_tool() {
        let result = SqrtTool.execute(json!({"x": 16.0})).await.unwrap();
        assert_eq!(result["result"], 4.0);
    }

    #[tokio::test]
    async fn test_sqrt_rejects_negative_input() {
        let err = SqrtTool.execute(json!({"x": -9.0})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[test]
    fn test_registry_holds_both_tools() {
        let mut registry = ToolRegistry::new();
        calculator_tools(&mut registry).unwrap();

        let names: Vec<String> = registry
            .declarations()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["add", "sqrt"]);
    }

    #[test]
    fn test_final_reply_requires_a_plain_assistant_tail() {
        let mut state = ChatState::from_prompt("what is 3 + 4?");
        assert!(state.final_reply().is_none());

        state.apply(ChatUpdate {
            messages: vec![Message::assistant_text("3 + 4 = 7")],
        });
        assert_eq!(state.final_reply(), Some("3 + 4 = 7"));
    }

    #[test]
    fn test_graph_compiles() {
        let mut registry = ToolRegistry::new();
        calculator_tools(&mut registry).unwrap();

        let graph = calculator_graph(Arc::new(NullModel), Arc::new(registry));
        assert!(graph.is_ok());
    }
}
