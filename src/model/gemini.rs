// SPDX-License-Identifier: MIT

//! Gemini Model - Google's Gemini API implementation

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use uuid::Uuid;

use super::{ChatModel, GenerationConfig, ModelRequest, StructuredRequest};
use crate::error::ModelError;
use crate::message::{AssistantTurn, Message, MessageLog, ToolCall};

/// Google Gemini model implementation
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
}

impl GeminiModel {
    /// Create a new GeminiModel
    ///
    /// Requires `GOOGLE_API_KEY` environment variable to be set.
    pub fn new(model_name: String) -> Result<Self, ModelError> {
        let api_key =
            env::var("GOOGLE_API_KEY").map_err(|_| ModelError::ApiKeyMissing("Gemini".into()))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, ModelError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model_name, self.api_key
        );

        log::debug!(
            "Gemini request body: {}",
            serde_json::to_string_pretty(body).unwrap_or_default()
        );

        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(ModelError::api("Gemini", format!("{}: {}", status, text)));
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("Gemini response: {}", resp_json);
        Ok(resp_json)
    }

    fn first_candidate(resp_json: &Value) -> Result<&Value, ModelError> {
        resp_json["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::invalid_response("no candidates in Gemini response"))
    }

    fn candidate_parts(candidate: &Value) -> Result<&Vec<Value>, ModelError> {
        candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| ModelError::invalid_response("no content parts in Gemini candidate"))
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<AssistantTurn, ModelError> {
        let mut body = json!({
            "system_instruction": { "parts": [{ "text": request.directive }] },
            "contents": build_contents(request.log),
        });

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.schema
                    })
                })
                .collect();
            body["tools"] = json!([{ "function_declarations": declarations }]);
        }

        if let Some(config) = request.config {
            body["generation_config"] = generation_config_json(config);
        }

        let resp_json = self.post(&body).await?;
        let candidate = Self::first_candidate(&resp_json)?;

        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            log::debug!("Gemini finish reason: {}", reason);
            if reason == "SAFETY" {
                return Err(ModelError::api("Gemini", "response blocked by safety filters"));
            }
            if reason == "MALFORMED_FUNCTION_CALL" {
                let msg = candidate
                    .get("finishMessage")
                    .and_then(|m| m.as_str())
                    .unwrap_or("no detail given");
                return Err(ModelError::invalid_response(format!(
                    "malformed function call: {}",
                    msg
                )));
            }
        }

        Ok(parse_gemini_parts(Self::candidate_parts(candidate)?))
    }

    async fn complete_structured(
        &self,
        request: StructuredRequest<'_>,
    ) -> Result<Value, ModelError> {
        let mut generation_config = match request.config {
            Some(config) => generation_config_json(config),
            None => json!({}),
        };
        generation_config["response_mime_type"] = json!("application/json");
        generation_config["response_schema"] = request.schema.clone();

        let body = json!({
            "system_instruction": { "parts": [{ "text": request.directive }] },
            "contents": build_contents(request.log),
            "generation_config": generation_config,
        });

        let resp_json = self.post(&body).await?;
        let candidate = Self::first_candidate(&resp_json)?;

        let text = Self::candidate_parts(candidate)?
            .iter()
            .find_map(|p| p["text"].as_str())
            .ok_or_else(|| ModelError::invalid_response("no text part in structured reply"))?;

        serde_json::from_str(text).map_err(|e| {
            ModelError::invalid_response(format!("structured reply is not valid JSON: {}", e))
        })
    }
}

/// Serialize the whole log to Gemini `contents` entries
pub fn build_contents(log: &MessageLog) -> Vec<Value> {
    log.iter().map(message_to_gemini_json).collect()
}

/// Serialize one log entry to Gemini content JSON
pub fn message_to_gemini_json(message: &Message) -> Value {
    match message {
        Message::Human { text, images } => {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(json!({ "text": text }));
            }
            for image in images {
                parts.push(json!({
                    "inline_data": { "mime_type": image.mime_type, "data": image.data }
                }));
            }
            json!({ "role": "user", "parts": parts })
        }
        // Gemini has no system role inside contents; the directive goes
        // through system_instruction, stray system entries become user text
        Message::System { text } => json!({ "role": "user", "parts": [{ "text": text }] }),
        Message::Assistant(turn) => {
            let mut parts = Vec::new();
            if !turn.text.is_empty() {
                parts.push(json!({ "text": turn.text }));
            }
            for call in &turn.tool_calls {
                parts.push(json!({ "functionCall": { "name": call.name, "args": call.args } }));
            }
            json!({ "role": "model", "parts": parts })
        }
        Message::ToolResult { name, payload, .. } => json!({
            "role": "user",
            "parts": [{ "functionResponse": { "name": name, "response": payload } }]
        }),
    }
}

/// Parse Gemini candidate parts into an assistant turn.
///
/// Gemini correlates function calls by name only, so each call gets a
/// minted id here; results are matched back through that id downstream.
pub fn parse_gemini_parts(parts: &[Value]) -> AssistantTurn {
    let mut turn = AssistantTurn::default();
    for part in parts {
        if let Some(text) = part["text"].as_str() {
            if !turn.text.is_empty() {
                turn.text.push('\n');
            }
            turn.text.push_str(text);
        } else if let Some(fc) = part.get("functionCall") {
            let name = fc["name"].as_str().unwrap_or_default().to_string();
            let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
            turn.tool_calls.push(ToolCall {
                id: Uuid::new_v4().to_string(),
                name,
                args,
            });
        }
    }
    turn
}

fn generation_config_json(config: &GenerationConfig) -> Value {
    let mut out = json!({});
    if let Some(temperature) = config.temperature {
        out["temperature"] = json!(temperature);
    }
    if let Some(max_output_tokens) = config.max_output_tokens {
        out["max_output_tokens"] = json!(max_output_tokens);
    }
    out
}
