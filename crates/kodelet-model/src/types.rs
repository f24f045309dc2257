// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Used for user messages that mix text with images.  Images are always
/// represented as data URLs (`data:<mime>;base64,<b64>`) or HTTPS URLs for
/// providers that accept remote references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        /// Data URL (`data:image/png;base64,...`) or HTTPS URL.
        image_url: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image {
            image_url: image_url.into(),
        }
    }
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>` and return
/// `Ok((mime_type, base64_string))`.  Returns `Err` for non-data-URLs so
/// callers can fall back to treating the string as a plain HTTPS URL.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: args.to_string(),
                },
            },
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
                is_error,
            },
        }
    }

    /// Construct a user message from a list of content parts (text + images).
    ///
    /// If `parts` contains a single text item, collapses to
    /// `MessageContent::Text`; an empty list falls back to `Text("")`.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageContent::Text(text.clone())
            } else {
                MessageContent::ContentParts(parts)
            }
        } else {
            MessageContent::ContentParts(parts)
        };
        Self {
            role: Role::User,
            content,
        }
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::ContentParts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// The tool-call id carried by a tool-use or tool-result message.
    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolCall { tool_call_id, .. }
            | MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic for text; images use a
    /// conservative fixed estimate (~765 tokens, the typical cost of a
    /// 512×512 region).
    pub fn approx_tokens(&self) -> usize {
        let chars = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::ContentParts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 765 * 4,
                })
                .sum(),
            MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
            MessageContent::ToolResult { content, .. } => content.len(),
        };
        (chars / 4).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message.
///
/// - `Text` – simple string (most messages)
/// - `ContentParts` – mixed text + image parts for multimodal user turns
/// - `ToolCall` – the assistant requests a tool invocation
/// - `ToolResult` – the result of a tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ContentParts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Request / response types ─────────────────────────────────────────────────

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt, separated out so providers that take it as a
    /// top-level field (Anthropic, Google) need not scan the history.
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Use this model id for this call only (weak-model requests).
    pub model_override: Option<String>,
    /// Attach prompt-cache markers to the system prompt and the longest
    /// stable history prefix.  A no-op for providers without explicit
    /// cache control.
    pub prompt_cache: bool,
}

/// The model's request to invoke a named tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    /// Call id forwarded verbatim back with the tool result.
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub args: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// One completed provider turn.
#[derive(Debug, Clone, Default)]
pub struct ProviderTurn {
    /// Assistant text blocks in emission order.
    pub text_blocks: Vec<String>,
    /// Tool-use intents in emission order.
    pub tool_uses: Vec<ToolUse>,
    pub usage: Usage,
    pub finish: FinishReason,
    /// Rate-limit window info, when the provider reports it
    /// (subscription driver only).
    pub rate_limits: Option<crate::ratelimit::RateLimitInfo>,
}

impl ProviderTurn {
    /// Concatenation of all text blocks.
    pub fn text(&self) -> String {
        self.text_blocks.join("")
    }
}

/// Token usage from one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens written into the provider's prompt cache.
    pub cache_creation_tokens: u64,
    /// Tokens served from the provider's prompt cache.
    pub cache_read_tokens: u64,
}

impl Usage {
    /// Fold another call's counters into this running total.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn tool_result_carries_error_flag() {
        let m = Message::tool_result("id-1", "boom", true);
        match &m.content {
            MessageContent::ToolResult {
                tool_call_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "id-1");
                assert!(is_error);
            }
            _ => panic!("wrong content variant"),
        }
    }

    #[test]
    fn tool_call_id_visible_on_both_sides_of_the_pair() {
        let use_msg = Message::tool_use("T1", "read_file", serde_json::json!({"path": "/a"}));
        let result_msg = Message::tool_result("T1", "contents", false);
        assert_eq!(use_msg.tool_call_id(), Some("T1"));
        assert_eq!(result_msg.tool_call_id(), Some("T1"));
    }

    #[test]
    fn user_with_parts_collapses_single_text() {
        let m = Message::user_with_parts(vec![ContentPart::text("hi")]);
        assert_eq!(m.as_text(), Some("hi"));
    }

    #[test]
    fn user_with_parts_keeps_image_parts() {
        let m = Message::user_with_parts(vec![
            ContentPart::text("what is this?"),
            ContentPart::image("data:image/png;base64,XYZ"),
        ]);
        assert!(matches!(m.content, MessageContent::ContentParts(ref p) if p.len() == 2));
        assert!(m.as_text().is_none());
    }

    #[test]
    fn approx_tokens_text_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_image_uses_fixed_estimate() {
        let m = Message::user_with_parts(vec![
            ContentPart::image("data:image/png;base64,A"),
            ContentPart::text("x"),
        ]);
        assert_eq!(m.approx_tokens(), (765 * 4 + 1) / 4);
    }

    #[test]
    fn usage_add_is_monotonic() {
        let mut total = Usage::default();
        let call = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 2,
            cache_read_tokens: 3,
        };
        total.add(&call);
        total.add(&call);
        assert_eq!(total.input_tokens, 20);
        assert_eq!(total.total_tokens(), 40);
    }

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::tool_use("T1", "grep", serde_json::json!({"pattern": "x"}));
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tool_result_round_trips_with_error_flag() {
        let original = Message::tool_result("T2", "no such file", true);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn parse_data_url_extracts_mime_and_payload() {
        let (mime, data) = parse_data_url_parts("data:image/png;base64,iVBOR").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "iVBOR");
    }

    #[test]
    fn parse_data_url_rejects_https() {
        assert!(parse_data_url_parts("https://example.com/a.png").is_err());
    }

    #[test]
    fn provider_turn_text_concatenates_blocks() {
        let turn = ProviderTurn {
            text_blocks: vec!["hel".into(), "lo".into()],
            ..Default::default()
        };
        assert_eq!(turn.text(), "hello");
    }
}
