// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError, provider::Provider, CompletionRequest, ContentPart, FinishReason,
    Message, MessageContent, ProviderTurn, Role, ToolUse, Usage,
};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API driver, authenticated with an API key.
pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
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
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Fatal("ANTHROPIC_API_KEY not set".into()))?;

        let model = req.model_override.as_deref().unwrap_or(&self.model);
        let body = build_request_body(model, self.max_tokens, self.temperature, &req);
        debug!(model = %model, messages = req.messages.len(), "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        read_turn(resp).await
    }
}

/// POST the request body and fold the HTTP response into a [`ProviderTurn`],
/// classifying failures per the provider error taxonomy.  Shared between
/// the API-key and subscription drivers.
pub(crate) async fn read_turn(resp: reqwest::Response) -> Result<ProviderTurn, ProviderError> {
    let status = resp.status();
    let rate_limits = crate::ratelimit::RateLimitInfo::from_headers(resp.headers());
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderError::from_http(status, &text, retry_after));
    }

    let body: Value = resp
        .json()
        .await
        .map_err(|e| ProviderError::Fatal(format!("malformed response body: {e}")))?;
    let mut turn = parse_turn(&body)?;
    if rate_limits.any_reported() {
        turn.rate_limits = Some(rate_limits);
    }
    Ok(turn)
}

/// Build the Messages API request body.
///
/// When `req.prompt_cache` is set, a `cache_control` marker is attached to
/// the system block and to the final content block of the last history
/// message, so the stable prefix (system + all prior turns) is cached and
/// the breakpoint advances with the conversation.
pub(crate) fn build_request_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    req: &CompletionRequest,
) -> Value {
    let mut messages = build_wire_messages(&req.messages);

    if req.prompt_cache {
        if let Some(last) = messages.last_mut() {
            if let Some(blocks) = last.get_mut("content").and_then(|c| c.as_array_mut()) {
                if let Some(block) = blocks.last_mut() {
                    block["cache_control"] = json!({ "type": "ephemeral" });
                }
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
    });

    if !req.system.is_empty() {
        if req.prompt_cache {
            body["system"] = json!([{
                "type": "text",
                "text": req.system,
                "cache_control": { "type": "ephemeral" },
            }]);
        } else {
            body["system"] = json!(req.system);
        }
    }

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Convert history into the Anthropic wire format.  Every message uses the
/// content-array form so cache markers can be attached uniformly.
///
/// The system prompt travels in the top-level `system` field; a system-role
/// message *inside* the history (the compaction seed) has no wire slot of
/// its own and is carried as a user turn.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        match (&m.role, &m.content) {
            (role, MessageContent::Text(t)) => {
                let role = if *role == Role::Assistant { "assistant" } else { "user" };
                out.push(json!({
                    "role": role,
                    "content": [{ "type": "text", "text": t }],
                }));
            }
            (_, MessageContent::ContentParts(parts)) => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => image_block(image_url),
                    })
                    .collect();
                out.push(json!({ "role": "user", "content": content }));
            }
            (_, MessageContent::ToolCall { tool_call_id, function }) => {
                out.push(json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": tool_call_id,
                        "name": function.name,
                        "input": serde_json::from_str::<Value>(&function.arguments)
                            .unwrap_or(json!({})),
                    }],
                }));
            }
            (_, MessageContent::ToolResult { tool_call_id, content, is_error }) => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                        "is_error": is_error,
                    }],
                }));
            }
        }
    }
    out
}

fn image_block(image_url: &str) -> Value {
    if let Ok((mime, data)) = crate::types::parse_data_url_parts(image_url) {
        json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime, "data": data },
        })
    } else {
        json!({
            "type": "image",
            "source": { "type": "url", "url": image_url },
        })
    }
}

/// Parse a non-streaming Messages API response into a [`ProviderTurn`].
pub(crate) fn parse_turn(body: &Value) -> Result<ProviderTurn, ProviderError> {
    let mut turn = ProviderTurn::default();

    let content = body["content"]
        .as_array()
        .ok_or_else(|| ProviderError::Fatal(format!("response has no content array: {body}")))?;
    for block in content {
        match block["type"].as_str().unwrap_or("") {
            "text" => {
                let text = block["text"].as_str().unwrap_or("").to_string();
                if !text.is_empty() {
                    turn.text_blocks.push(text);
                }
            }
            "tool_use" => {
                turn.tool_uses.push(ToolUse {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    args: block["input"].clone(),
                });
            }
            // thinking blocks and future types carry nothing the loop needs
            _ => {}
        }
    }

    turn.finish = match body["stop_reason"].as_str().unwrap_or("") {
        "end_turn" | "stop_sequence" => FinishReason::EndTurn,
        "tool_use" => FinishReason::ToolUse,
        "max_tokens" => FinishReason::MaxTokens,
        _ => FinishReason::Other,
    };

    if let Some(usage) = body.get("usage") {
        turn.usage = Usage {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            cache_creation_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0),
            cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
        };
    }

    Ok(turn)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
