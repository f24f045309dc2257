// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Shared implementation for OpenAI-compatible chat completion APIs.
//!
//! The OpenAI and Copilot drivers both speak the `/chat/completions` wire
//! format; this module holds the message/turn mapping so each driver only
//! configures its endpoint and auth.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError, provider::Provider, CompletionRequest, ContentPart, FinishReason,
    Message, MessageContent, ProviderTurn, Role, ToolUse, Usage,
};

pub struct OpenAiCompatProvider {
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            extra_headers,
            client: reqwest::Client::new(),
        }
    }

    pub(crate) async fn send_with_bearer(
        &self,
        bearer: Option<&str>,
        req: &CompletionRequest,
    ) -> Result<ProviderTurn, ProviderError> {
        let model = req.model_override.as_deref().unwrap_or(&self.model);
        let body = build_request_body(model, self.max_tokens, self.temperature, req);
        debug!(driver = self.driver_name, model = %model, "sending chat completion");

        let mut http = self.client.post(&self.chat_url);
        if let Some(key) = bearer {
            http = http.bearer_auth(key);
        }
        for (name, val) in &self.extra_headers {
            http = http.header(name.as_str(), val.as_str());
        }

        let resp = http
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = resp.status();
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
        parse_turn(&body)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Fatal(format!("{} API key not set", self.driver_name)))?;
        self.send_with_bearer(Some(key), &req).await
    }
}

/// Build the chat-completions request body.
pub(crate) fn build_request_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    req: &CompletionRequest,
) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
    if !req.system.is_empty() {
        messages.push(json!({ "role": "system", "content": req.system }));
    }
    messages.extend(build_wire_messages(&req.messages));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Convert history into the chat-completions dialect.  Tool uses become
/// assistant `tool_calls` entries; tool results become `role: tool`
/// messages referencing the same call id, which the response mapping
/// carries back to the core's call-id contract unchanged.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        match (&m.role, &m.content) {
            (role, MessageContent::Text(t)) => {
                // This wire has a real system role, so the compaction seed
                // keeps it.
                let role = match role {
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    _ => "user",
                };
                out.push(json!({ "role": role, "content": t }));
            }
            (_, MessageContent::ContentParts(parts)) => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => {
                            json!({ "type": "image_url", "image_url": { "url": image_url } })
                        }
                    })
                    .collect();
                out.push(json!({ "role": "user", "content": content }));
            }
            (_, MessageContent::ToolCall { tool_call_id, function }) => {
                out.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": [{
                        "id": tool_call_id,
                        "type": "function",
                        "function": {
                            "name": function.name,
                            "arguments": function.arguments,
                        }
                    }],
                }));
            }
            (_, MessageContent::ToolResult { tool_call_id, content, is_error }) => {
                let content = if *is_error {
                    format!("ERROR: {content}")
                } else {
                    content.clone()
                };
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    out
}

/// Parse a non-streaming chat-completions response.
pub(crate) fn parse_turn(body: &Value) -> Result<ProviderTurn, ProviderError> {
    let choice = body["choices"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::Fatal(format!("response has no choices: {body}")))?;

    let mut turn = ProviderTurn::default();
    let message = &choice["message"];

    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            turn.text_blocks.push(text.to_string());
        }
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            turn.tool_uses.push(ToolUse {
                id: call["id"].as_str().unwrap_or("").to_string(),
                name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                args: serde_json::from_str(arguments).unwrap_or_else(|_| json!({})),
            });
        }
    }

    turn.finish = match choice["finish_reason"].as_str().unwrap_or("") {
        "stop" => FinishReason::EndTurn,
        "tool_calls" => FinishReason::ToolUse,
        "length" => FinishReason::MaxTokens,
        _ => FinishReason::Other,
    };

    if let Some(usage) = body.get("usage") {
        turn.usage = Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            cache_creation_tokens: 0,
            cache_read_tokens: usage["prompt_tokens_details"]["cached_tokens"]
                .as_u64()
                .unwrap_or(0),
        };
    }

    Ok(turn)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_becomes_first_message() {
        let req = CompletionRequest {
            system: "be brief".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = build_request_body("gpt-4.1", 1024, 0.2, &req);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
    }

    #[test]
    fn tool_use_maps_to_tool_calls_entry() {
        let m = Message::tool_use("call_1", "grep", serde_json::json!({"pattern": "x"}));
        let msgs = build_wire_messages(&[m]);
        let call = &msgs[0]["tool_calls"][0];
        assert_eq!(call["id"], "call_1");
        assert_eq!(call["function"]["name"], "grep");
        // Arguments stay a JSON-encoded string on this wire.
        assert!(call["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_result_maps_to_tool_role() {
        let m = Message::tool_result("call_1", "3 matches", false);
        let msgs = build_wire_messages(&[m]);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "call_1");
        assert_eq!(msgs[0]["content"], "3 matches");
    }

    #[test]
    fn error_tool_result_is_prefixed() {
        let m = Message::tool_result("call_1", "denied", true);
        let msgs = build_wire_messages(&[m]);
        assert_eq!(msgs[0]["content"], "ERROR: denied");
    }

    #[test]
    fn image_part_uses_image_url_block() {
        let m = Message::user_with_parts(vec![
            ContentPart::text("see"),
            ContentPart::image("data:image/png;base64,AA=="),
        ]);
        let msgs = build_wire_messages(&[m]);
        assert_eq!(msgs[0]["content"][1]["type"], "image_url");
    }

    #[test]
    fn tools_use_function_wrapper() {
        let req = CompletionRequest {
            tools: vec![crate::ToolSchema {
                name: "bash".into(),
                description: "run".into(),
                parameters: json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = build_request_body("m", 1024, 0.2, &req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
    }

    #[test]
    fn parse_turn_maps_tool_calls_back_to_call_ids() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "read_file", "arguments": "{\"path\":\"/a\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 4 }
        });
        let turn = parse_turn(&body).unwrap();
        assert_eq!(turn.finish, FinishReason::ToolUse);
        assert_eq!(turn.tool_uses[0].id, "call_9");
        assert_eq!(turn.tool_uses[0].args["path"], "/a");
        assert_eq!(turn.usage.input_tokens, 10);
    }

    #[test]
    fn parse_turn_reads_cached_tokens() {
        let body = json!({
            "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 5,
                "prompt_tokens_details": { "cached_tokens": 80 }
            }
        });
        let turn = parse_turn(&body).unwrap();
        assert_eq!(turn.usage.cache_read_tokens, 80);
        assert_eq!(turn.text(), "ok");
    }

    #[test]
    fn parse_turn_without_choices_is_fatal() {
        let body = json!({ "error": { "message": "bad" } });
        assert!(matches!(
            parse_turn(&body).unwrap_err(),
            ProviderError::Fatal(_)
        ));
    }

    #[test]
    fn malformed_tool_arguments_fall_back_to_empty_object() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c1",
                        "function": { "name": "t", "arguments": "{not json" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let turn = parse_turn(&body).unwrap();
        assert_eq!(turn.tool_uses[0].args, json!({}));
    }
}
