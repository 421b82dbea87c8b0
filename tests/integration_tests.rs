//! Integration tests for the bundled flows
//!
//! These tests drive whole graphs end to end against a scripted model.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stategraph_rs::error::{FlowError, ModelError};
use stategraph_rs::flows::calculator::{calculator_graph, calculator_tools, ChatState};
use stategraph_rs::flows::crop::{crop_graph, crop_tools, ApprovalStatus, CropState, RawImage};
use stategraph_rs::message::{AssistantTurn, Message, ToolCall};
use stategraph_rs::model::{ChatModel, ModelRequest, StructuredRequest};
use stategraph_rs::registry::ToolRegistry;

// ============================================================================
// Scripted model
// ============================================================================

/// Replays a fixed list of assistant turns and evaluation verdicts
struct ScriptedModel {
    replies: Vec<AssistantTurn>,
    verdicts: Vec<Value>,
    reply_index: AtomicUsize,
    verdict_index: AtomicUsize,
}

impl ScriptedModel {
    fn new(replies: Vec<AssistantTurn>) -> Self {
        Self {
            replies,
            verdicts: Vec::new(),
            reply_index: AtomicUsize::new(0),
            verdict_index: AtomicUsize::new(0),
        }
    }

    fn with_verdicts(mut self, verdicts: Vec<Value>) -> Self {
        self.verdicts = verdicts;
        self
    }

    fn completions(&self) -> usize {
        self.reply_index.load(Ordering::SeqCst)
    }

    fn structured_completions(&self) -> usize {
        self.verdict_index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _request: ModelRequest<'_>) -> Result<AssistantTurn, ModelError> {
        let index = self.reply_index.fetch_add(1, Ordering::SeqCst);
        match self.replies.get(index) {
            Some(reply) => Ok(reply.clone()),
            None => Err(ModelError::invalid_response("reply script exhausted")),
        }
    }

    async fn complete_structured(
        &self,
        _request: StructuredRequest<'_>,
    ) -> Result<Value, ModelError> {
        let index = self.verdict_index.fetch_add(1, Ordering::SeqCst);
        match self.verdicts.get(index) {
            Some(verdict) => Ok(verdict.clone()),
            None => Err(ModelError::invalid_response("verdict script exhausted")),
        }
    }
}

fn text(reply: &str) -> AssistantTurn {
    AssistantTurn {
        text: reply.to_string(),
        tool_calls: Vec::new(),
    }
}

fn call(id: &str, name: &str, args: Value) -> AssistantTurn {
    AssistantTurn {
        text: String::new(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }],
    }
}

fn calculator_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    calculator_tools(&mut registry).unwrap();
    Arc::new(registry)
}

fn test_source_image(width: u32, height: u32) -> RawImage {
    RawImage {
        width,
        height,
        pixels: vec![127u8; (width * height * 3) as usize],
    }
}

// ============================================================================
// Calculator flow
// ============================================================================

#[tokio::test]
async fn test_calculator_single_round_trip() {
    let model = Arc::new(ScriptedModel::new(vec![
        call("call-1", "add", json!({"a": 3.0, "b": 4.0})),
        text("3 + 4 = 7"),
    ]));
    let graph = calculator_graph(model, calculator_registry()).unwrap();

    let state = graph
        .run(ChatState::from_prompt("what is 3 + 4?"))
        .await
        .unwrap();

    let entries = state.messages.entries();
    assert_eq!(entries.len(), 4);
    match &entries[2] {
        Message::ToolResult {
            call_id,
            payload,
            is_error,
            ..
        } => {
            assert_eq!(call_id, "call-1");
            assert_eq!(payload["result"], 7.0);
            assert!(!*is_error);
        }
        other => panic!("unexpected entry: {:?}", other),
    }
    assert_eq!(state.final_reply(), Some("3 + 4 = 7"));
}

#[tokio::test]
async fn test_calculator_chained_round_trips() {
    let model = Arc::new(ScriptedModel::new(vec![
        call("call-1", "add", json!({"a": 9.0, "b": 7.0})),
        call("call-2", "sqrt", json!({"x": 16.0})),
        text("The square root of 9 + 7 is 4"),
    ]));
    let graph = calculator_graph(model.clone(), calculator_registry()).unwrap();

    let state = graph
        .run(ChatState::from_prompt("square root of 9 + 7?"))
        .await
        .unwrap();

    let entries = state.messages.entries();
    assert_eq!(entries.len(), 6);
    match &entries[4] {
        Message::ToolResult { payload, .. } => {
            let result = payload["result"].as_f64().unwrap();
            assert!((result - 4.0).abs() < 1e-9);
        }
        other => panic!("unexpected entry: {:?}", other),
    }
    assert_eq!(model.completions(), 3);
}

#[tokio::test]
async fn test_calculator_tool_failure_feeds_back() {
    let model = Arc::new(ScriptedModel::new(vec![
        call("call-1", "sqrt", json!({"x": -9.0})),
        text("That number has no real square root"),
    ]));
    let graph = calculator_graph(model, calculator_registry()).unwrap();

    let state = graph
        .run(ChatState::from_prompt("sqrt of -9?"))
        .await
        .unwrap();

    match &state.messages.entries()[2] {
        Message::ToolResult {
            payload, is_error, ..
        } => {
            assert!(*is_error);
            assert!(payload["error"].as_str().unwrap().contains("square root"));
        }
        other => panic!("unexpected entry: {:?}", other),
    }
    assert!(state.final_reply().is_some());
}

#[tokio::test]
async fn test_calculator_invalid_arguments_feed_back() {
    let model = Arc::new(ScriptedModel::new(vec![
        call("call-1", "add", json!({"a": "three"})),
        text("I passed bad arguments, let me reconsider"),
    ]));
    let graph = calculator_graph(model, calculator_registry()).unwrap();

    let state = graph
        .run(ChatState::from_prompt("add three and four"))
        .await
        .unwrap();

    match &state.messages.entries()[2] {
        Message::ToolResult {
            payload, is_error, ..
        } => {
            assert!(*is_error);
            let reason = payload["error"].as_str().unwrap();
            assert!(reason.contains("'a'"));
            assert!(reason.contains("'b'"));
        }
        other => panic!("unexpected entry: {:?}", other),
    }
}

#[tokio::test]
async fn test_calculator_direct_answer_routes_to_end() {
    let model = Arc::new(ScriptedModel::new(vec![text("Hello to you too")]));
    let graph = calculator_graph(model.clone(), calculator_registry()).unwrap();

    let state = graph.run(ChatState::from_prompt("hello")).await.unwrap();

    assert_eq!(state.messages.len(), 2);
    assert_eq!(model.completions(), 1);
}

#[tokio::test]
async fn test_step_limit_stops_a_cycling_run() {
    let replies: Vec<AssistantTurn> = (0..20)
        .map(|i| call(&format!("call-{}", i), "add", json!({"a": 1.0, "b": 1.0})))
        .collect();
    let model = Arc::new(ScriptedModel::new(replies));
    let graph = calculator_graph(model, calculator_registry())
        .unwrap()
        .with_step_limit(7);

    let err = graph
        .run(ChatState::from_prompt("keep adding"))
        .await
        .unwrap_err();
    match err {
        FlowError::StepLimit { limit } => assert_eq!(limit, 7),
        other => panic!("expected step limit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_model_failure_aborts_the_run() {
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let graph = calculator_graph(model, calculator_registry()).unwrap();

    let err = graph
        .run(ChatState::from_prompt("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Model(_)));
}

// ============================================================================
// Crop flow
// ============================================================================

#[tokio::test]
async fn test_crop_rejection_cycles_into_approval() {
    let source = test_source_image(10, 10);
    let model = Arc::new(
        ScriptedModel::new(vec![
            call(
                "c-1",
                "crop_image",
                json!({"x": 0, "y": 0, "width": 4, "height": 4}),
            ),
            call(
                "c-2",
                "crop_image",
                json!({"x": 2, "y": 2, "width": 6, "height": 6}),
            ),
        ])
        .with_verdicts(vec![
            json!({"approved": false, "feedback": "subject cut off at the right edge"}),
            json!({"approved": true, "feedback": "looks right"}),
        ]),
    );

    let mut registry = ToolRegistry::new();
    crop_tools(&mut registry, source.clone()).unwrap();
    let graph = crop_graph(model.clone(), Arc::new(registry), 3).unwrap();

    let state = graph
        .run(CropState::new("crop out the subject", &source))
        .await
        .unwrap();

    assert_eq!(state.approval.status, ApprovalStatus::Approved);
    assert_eq!(state.attempts, 2);
    assert_eq!(model.completions(), 2);
    assert_eq!(model.structured_completions(), 2);

    // the rejection came back as a user turn before the second attempt
    let feedback_entry = state
        .messages
        .iter()
        .filter_map(|entry| match entry {
            Message::Human { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .find(|text| text.contains("subject cut off"));
    assert!(feedback_entry.is_some());

    let artifact = state.cropped_image.as_ref().unwrap();
    let cropped = RawImage::from_image_data(artifact).unwrap();
    assert_eq!((cropped.width, cropped.height), (6, 6));
}

#[tokio::test]
async fn test_crop_missing_artifact_short_circuits() {
    let source = test_source_image(10, 10);
    let model = Arc::new(ScriptedModel::new(vec![text(
        "This image does not need cropping",
    )]));

    let mut registry = ToolRegistry::new();
    crop_tools(&mut registry, source.clone()).unwrap();
    let graph = crop_graph(model.clone(), Arc::new(registry), 1).unwrap();

    let state = graph
        .run(CropState::new("crop out the subject", &source))
        .await
        .unwrap();

    assert_eq!(state.approval.status, ApprovalStatus::Rejected);
    assert!(state
        .approval
        .feedback
        .as_deref()
        .unwrap()
        .contains("No cropped image"));
    assert!(state.cropped_image.is_none());
    assert_eq!(model.structured_completions(), 0);
}

#[tokio::test]
async fn test_crop_attempt_exhaustion_ends_rejected() {
    let source = test_source_image(10, 10);
    let model = Arc::new(
        ScriptedModel::new(vec![call(
            "c-1",
            "crop_image",
            json!({"x": 0, "y": 0, "width": 2, "height": 2}),
        )])
        .with_verdicts(vec![json!({
            "approved": false,
            "feedback": "far too tight"
        })]),
    );

    let mut registry = ToolRegistry::new();
    crop_tools(&mut registry, source.clone()).unwrap();
    let graph = crop_graph(model.clone(), Arc::new(registry), 1).unwrap();

    let state = graph
        .run(CropState::new("crop out the subject", &source))
        .await
        .unwrap();

    assert_eq!(state.approval.status, ApprovalStatus::Rejected);
    assert_eq!(state.approval.feedback.as_deref(), Some("far too tight"));
    assert_eq!(state.attempts, 1);
    assert_eq!(model.completions(), 1);
}
