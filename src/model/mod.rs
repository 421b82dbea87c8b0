// SPDX-License-Identifier: MIT

//! Model invocation adapters
//!
//! [ChatModel] is the only place this crate touches a hosted language
//! model, and it is always passed in explicitly so tests can substitute
//! a deterministic stub. Provider implementations live in their own
//! submodules:
//! - [gemini] - Google's Gemini API
//! - [openai] - OpenAI-compatible chat completions APIs

pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::message::{AssistantTurn, MessageLog};
use crate::tool::ToolDecl;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// One free-form completion request.
#[derive(Debug)]
pub struct ModelRequest<'a> {
    /// Standing directive for this call
    pub directive: &'a str,
    /// Full conversation so far
    pub log: &'a MessageLog,
    /// Tools the model may request
    pub tools: &'a [ToolDecl],
    pub config: Option<&'a GenerationConfig>,
}

/// A completion request whose reply must match a fixed JSON schema.
#[derive(Debug)]
pub struct StructuredRequest<'a> {
    pub directive: &'a str,
    pub log: &'a MessageLog,
    /// Schema the reply object must conform to
    pub schema: &'a Value,
    pub config: Option<&'a GenerationConfig>,
}

/// Core trait for model provider implementations.
///
/// Provider failures surface as [ModelError] and are fatal to the
/// current run; retry policy belongs to the HTTP layer, not here.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-form completion: the reply is text, tool-call requests, or
    /// both.
    async fn complete(&self, request: ModelRequest<'_>) -> Result<AssistantTurn, ModelError>;

    /// Completion constrained to a JSON schema; the reply is the parsed
    /// object.
    async fn complete_structured(
        &self,
        request: StructuredRequest<'_>,
    ) -> Result<Value, ModelError>;
}
