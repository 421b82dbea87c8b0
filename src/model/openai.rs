// SPDX-License-Identifier: MIT

//! OpenAI Model - Chat Completions API implementation
//!
//! Also covers OpenAI-compatible servers through `OPENAI_BASE_URL`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

use super::{ChatModel, ModelRequest, StructuredRequest};
use crate::error::ModelError;
use crate::message::{AssistantTurn, Message, MessageLog, ToolCall};
use crate::tool::ToolDecl;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI model implementation
pub struct OpenAIModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIModel {
    /// Create a new OpenAIModel
    ///
    /// Requires `OPENAI_API_KEY`; `OPENAI_BASE_URL` overrides the endpoint
    /// for compatible servers.
    pub fn new(model_name: String) -> Result<Self, ModelError> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| ModelError::ApiKeyMissing("OpenAI".into()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url,
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
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
            return Err(ModelError::api("OpenAI", format!("{}: {}", status, text)));
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("OpenAI response: {}", resp_json);
        Ok(resp_json)
    }

    fn build_messages(directive: &str, log: &MessageLog) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": directive })];
        messages.extend(log.iter().map(Self::message_to_openai));
        messages
    }

    fn message_to_openai(message: &Message) -> Value {
        match message {
            Message::Human { text, images } => {
                if images.is_empty() {
                    return json!({ "role": "user", "content": text });
                }
                let mut content = vec![json!({ "type": "text", "text": text })];
                for image in images {
                    content.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", image.mime_type, image.data)
                        }
                    }));
                }
                json!({ "role": "user", "content": content })
            }
            Message::System { text } => json!({ "role": "system", "content": text }),
            Message::Assistant(turn) => {
                let mut entry = json!({ "role": "assistant" });
                entry["content"] = if turn.text.is_empty() {
                    Value::Null
                } else {
                    json!(turn.text)
                };
                if turn.has_tool_calls() {
                    let calls: Vec<Value> = turn
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.args.to_string()
                                }
                            })
                        })
                        .collect();
                    entry["tool_calls"] = json!(calls);
                }
                entry
            }
            Message::ToolResult {
                call_id, payload, ..
            } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": payload.to_string()
            }),
        }
    }

    fn tools_to_openai_format(tools: &[ToolDecl]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.schema
                    }
                })
            })
            .collect()
    }

    fn parse_openai_response(resp_json: &Value) -> Result<AssistantTurn, ModelError> {
        let message = resp_json["choices"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .ok_or_else(|| ModelError::invalid_response("no choices in OpenAI response"))?;

        let mut turn = AssistantTurn {
            text: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls: Vec::new(),
        };

        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let args = call["function"]["arguments"]
                    .as_str()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| json!({}));
                turn.tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or_default().to_string(),
                    name: call["function"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    args,
                });
            }
        }

        Ok(turn)
    }
}

#[async_trait]
impl ChatModel for OpenAIModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<AssistantTurn, ModelError> {
        let mut body = json!({
            "model": self.model_name,
            "messages": Self::build_messages(request.directive, request.log),
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(Self::tools_to_openai_format(request.tools));
        }
        if let Some(config) = request.config {
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
            if let Some(max_tokens) = config.max_output_tokens {
                body["max_tokens"] = json!(max_tokens);
            }
        }

        let resp_json = self.post(&body).await?;
        Self::parse_openai_response(&resp_json)
    }

    async fn complete_structured(
        &self,
        request: StructuredRequest<'_>,
    ) -> Result<Value, ModelError> {
        let mut body = json!({
            "model": self.model_name,
            "messages": Self::build_messages(request.directive, request.log),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_reply",
                    "schema": request.schema
                }
            }
        });

        if let Some(config) = request.config {
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
            if let Some(max_tokens) = config.max_output_tokens {
                body["max_tokens"] = json!(max_tokens);
            }
        }

        let resp_json = self.post(&body).await?;
        let content = resp_json["choices"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| ModelError::invalid_response("no content in structured reply"))?;

        serde_json::from_str(content).map_err(|e| {
            ModelError::invalid_response(format!("structured reply is not valid JSON: {}", e))
        })
    }
}
