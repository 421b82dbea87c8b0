// SPDX-License-Identifier: MIT

//! Conversation entries and the append-only message log

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FlowError;
use crate::state::reducers;

/// Opaque image payload attached to a human entry.
///
/// The bytes stay base64-encoded end to end; only provider adapters and
/// the demo flows ever look inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id; the matching result entry carries the same id
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// One assistant reply: free text, tool-call requests, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// End-user input, optionally with image attachments
    Human {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageData>,
    },
    /// Standing directive kept in the log itself
    System { text: String },
    /// Model output
    Assistant(AssistantTurn),
    /// Outcome of one tool call, tied back to its request by `call_id`
    ToolResult {
        call_id: String,
        name: String,
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn human(text: impl Into<String>) -> Self {
        Self::Human {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn human_with_images(text: impl Into<String>, images: Vec<ImageData>) -> Self {
        Self::Human {
            text: text.into(),
            images,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant(AssistantTurn {
            text: text.into(),
            tool_calls: Vec::new(),
        })
    }

    /// Successful tool result
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            is_error: false,
        }
    }

    /// Failed tool result, shaped so the model can read the reason
    pub fn tool_error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            payload: serde_json::json!({ "error": reason.into() }),
            is_error: true,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match self {
            Self::Assistant(turn) => Some(turn),
            _ => None,
        }
    }
}

/// Append-only conversation log.
///
/// Entries are only ever added at the end and never mutated afterwards;
/// merging two logs is concatenation. An empty log is a normal state,
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageLog(Vec<Message>);

impl MessageLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, entry: Message) {
        self.0.push(entry);
    }

    /// Concatenate a batch of new entries, preserving their order.
    pub fn append(&mut self, entries: Vec<Message>) {
        reducers::concat(&mut self.0, entries);
    }

    /// Last entry, or None on an empty log.
    pub fn latest(&self) -> Option<&Message> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[Message] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }

    /// True when the latest entry is an assistant turn whose tool calls
    /// have not been answered yet.
    pub fn has_pending_tool_calls(&self) -> bool {
        matches!(self.latest(), Some(Message::Assistant(turn)) if turn.has_tool_calls())
    }

    /// Check the tool-call correlation contract over the whole log:
    /// every call is answered by exactly one result with the same id, in
    /// request order, before anything else follows. Runs before each
    /// model call.
    pub fn verify_tool_correlation(&self) -> Result<(), FlowError> {
        let mut pending: VecDeque<&str> = VecDeque::new();

        for entry in &self.0 {
            match entry {
                Message::Assistant(turn) => {
                    if !pending.is_empty() {
                        return Err(FlowError::protocol(format!(
                            "assistant entry arrived while {} tool call(s) were unanswered",
                            pending.len()
                        )));
                    }
                    let mut seen = HashSet::new();
                    for call in &turn.tool_calls {
                        if !seen.insert(call.id.as_str()) {
                            return Err(FlowError::protocol(format!(
                                "duplicate tool call id '{}'",
                                call.id
                            )));
                        }
                        pending.push_back(call.id.as_str());
                    }
                }
                Message::ToolResult { call_id, .. } => match pending.front() {
                    Some(expected) if *expected == call_id => {
                        pending.pop_front();
                    }
                    Some(expected) => {
                        return Err(FlowError::protocol(format!(
                            "tool result '{}' out of order, expected '{}'",
                            call_id, expected
                        )));
                    }
                    None => {
                        return Err(FlowError::protocol(format!(
                            "tool result '{}' has no matching tool call",
                            call_id
                        )));
                    }
                },
                Message::Human { .. } | Message::System { .. } => {
                    if !pending.is_empty() {
                        return Err(FlowError::protocol(format!(
                            "{} tool call(s) unanswered before the next conversation entry",
                            pending.len()
                        )));
                    }
                }
            }
        }

        if !pending.is_empty() {
            return Err(FlowError::protocol(format!(
                "{} tool call(s) still unanswered",
                pending.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args: json!({}),
        }
    }

    fn assistant_with_calls(calls: Vec<ToolCall>) -> Message {
        Message::Assistant(AssistantTurn {
            text: String::new(),
            tool_calls: calls,
        })
    }

    #[test]
    fn test_latest_on_empty_log_is_none() {
        let log = MessageLog::new();
        assert!(log.latest().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_concatenates_in_order() {
        let mut log = MessageLog::new();
        log.push(Message::human("one"));
        log.append(vec![Message::assistant_text("two"), Message::human("three")]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0], Message::human("one"));
        assert_eq!(log.latest(), Some(&Message::human("three")));
    }

    #[test]
    fn test_has_pending_tool_calls() {
        let mut log = MessageLog::new();
        log.push(Message::human("hi"));
        assert!(!log.has_pending_tool_calls());

        log.push(assistant_with_calls(vec![call("c1", "add")]));
        assert!(log.has_pending_tool_calls());

        log.push(Message::tool_result("c1", "add", json!({"result": 1})));
        assert!(!log.has_pending_tool_calls());
    }

    #[test]
    fn test_correlation_accepts_answered_calls() {
        let mut log = MessageLog::new();
        log.push(Message::human("hi"));
        log.push(assistant_with_calls(vec![call("c1", "add"), call("c2", "sqrt")]));
        log.push(Message::tool_result("c1", "add", json!({"result": 1})));
        log.push(Message::tool_result("c2", "sqrt", json!({"result": 2})));
        log.push(Message::assistant_text("done"));

        assert!(log.verify_tool_correlation().is_ok());
    }

    #[test]
    fn test_correlation_rejects_missing_result() {
        let mut log = MessageLog::new();
        log.push(assistant_with_calls(vec![call("c1", "add")]));

        let err = log.verify_tool_correlation().unwrap_err();
        assert!(err.to_string().contains("unanswered"));
    }

    #[test]
    fn test_correlation_rejects_out_of_order_results() {
        let mut log = MessageLog::new();
        log.push(assistant_with_calls(vec![call("c1", "add"), call("c2", "sqrt")]));
        log.push(Message::tool_result("c2", "sqrt", json!({})));

        let err = log.verify_tool_correlation().unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_correlation_rejects_orphan_result() {
        let mut log = MessageLog::new();
        log.push(Message::human("hi"));
        log.push(Message::tool_result("ghost", "add", json!({})));

        let err = log.verify_tool_correlation().unwrap_err();
        assert!(err.to_string().contains("no matching tool call"));
    }

    #[test]
    fn test_correlation_rejects_duplicate_ids() {
        let mut log = MessageLog::new();
        log.push(assistant_with_calls(vec![call("c1", "add"), call("c1", "sqrt")]));

        let err = log.verify_tool_correlation().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_correlation_rejects_duplicate_result() {
        let mut log = MessageLog::new();
        log.push(assistant_with_calls(vec![call("c1", "add")]));
        log.push(Message::tool_result("c1", "add", json!({})));
        log.push(Message::tool_result("c1", "add", json!({})));

        let err = log.verify_tool_correlation().unwrap_err();
        assert!(err.to_string().contains("no matching tool call"));
    }

    #[test]
    fn test_message_serializes_with_role_tag() {
        let entry = Message::human("hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "human");
        assert_eq!(json["text"], "hello");
        // no images key when there are none
        assert!(json.get("images").is_none());

        let entry = Message::tool_error("c1", "add", "boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["is_error"], true);
        assert_eq!(json["payload"]["error"], "boom");
    }

    #[test]
    fn test_assistant_round_trips_through_json() {
        let entry = Message::Assistant(AssistantTurn {
            text: "calling".to_string(),
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "add".to_string(),
                args: json!({"a": 1, "b": 2}),
            }],
        });

        let json = serde_json::to_string(&entry).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
