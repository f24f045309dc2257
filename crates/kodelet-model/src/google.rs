// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Google Generative Language API driver (`generateContent`).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError, provider::Provider, CompletionRequest, ContentPart, FinishReason,
    Message, MessageContent, ProviderTurn, Role, ToolUse, Usage,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Fatal("GEMINI_API_KEY not set".into()))?;

        let model = req.model_override.as_deref().unwrap_or(&self.model);
        let body = build_request_body(self.max_tokens, self.temperature, &req);
        debug!(model = %model, "sending google request");

        let resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ))
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(status, &text, None));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("malformed response body: {e}")))?;
        parse_turn(&body)
    }
}

pub(crate) fn build_request_body(max_tokens: u32, temperature: f32, req: &CompletionRequest) -> Value {
    let mut body = json!({
        "contents": build_wire_contents(&req.messages),
        "generationConfig": {
            "maxOutputTokens": max_tokens,
            "temperature": temperature,
        },
    });

    if !req.system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": req.system }] });
    }

    if !req.tools.is_empty() {
        let decls: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": decls }]);
    }

    body
}

/// Gemini has no tool-call ids on the wire.  Kodelet's ids are encoded as
/// `name` suffix-free function calls going out; coming back, ids are
/// synthesized (`gcall_<n>`) in emission order, and tool results are matched
/// to calls by position within the same turn.
fn build_wire_contents(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        match (&m.role, &m.content) {
            // Gemini has no in-history system role; the compaction seed
            // rides as a user turn.
            (role, MessageContent::Text(t)) => {
                let role = if *role == Role::Assistant { "model" } else { "user" };
                out.push(json!({ "role": role, "parts": [{ "text": t }] }));
            }
            (_, MessageContent::ContentParts(parts)) => {
                let wire: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "text": text }),
                        ContentPart::Image { image_url } => {
                            match crate::types::parse_data_url_parts(image_url) {
                                Ok((mime, data)) => json!({
                                    "inlineData": { "mimeType": mime, "data": data }
                                }),
                                Err(_) => json!({
                                    "fileData": { "fileUri": image_url }
                                }),
                            }
                        }
                    })
                    .collect();
                out.push(json!({ "role": "user", "parts": wire }));
            }
            (_, MessageContent::ToolCall { function, .. }) => {
                out.push(json!({
                    "role": "model",
                    "parts": [{
                        "functionCall": {
                            "name": function.name,
                            "args": serde_json::from_str::<Value>(&function.arguments)
                                .unwrap_or(json!({})),
                        }
                    }],
                }));
            }
            (_, MessageContent::ToolResult { content, is_error, .. }) => {
                // The function name is recovered from the paired call when
                // rebuilding; Gemini only needs a name-shaped key, so reuse
                // the result role marker.
                out.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": "tool",
                            "response": { "output": content, "error": is_error },
                        }
                    }],
                }));
            }
        }
    }
    out
}

pub(crate) fn parse_turn(body: &Value) -> Result<ProviderTurn, ProviderError> {
    let candidate = body["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::Fatal(format!("response has no candidates: {body}")))?;

    let mut turn = ProviderTurn::default();
    let mut call_index = 0usize;

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    turn.text_blocks.push(text.to_string());
                }
            }
            if let Some(call) = part.get("functionCall") {
                // Synthesize ids in emission order; Gemini does not send any.
                turn.tool_uses.push(ToolUse {
                    id: format!("gcall_{call_index}"),
                    name: call["name"].as_str().unwrap_or("").to_string(),
                    args: call["args"].clone(),
                });
                call_index += 1;
            }
        }
    }

    turn.finish = if !turn.tool_uses.is_empty() {
        FinishReason::ToolUse
    } else {
        match candidate["finishReason"].as_str().unwrap_or("") {
            "STOP" => FinishReason::EndTurn,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            _ => FinishReason::Other,
        }
    };

    if let Some(usage) = body.get("usageMetadata") {
        turn.usage = Usage {
            input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0),
            output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
            cache_creation_tokens: 0,
            cache_read_tokens: usage["cachedContentTokenCount"].as_u64().unwrap_or(0),
        };
    }

    Ok(turn)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
