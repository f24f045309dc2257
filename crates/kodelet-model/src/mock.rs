// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    error::ProviderError, provider::Provider, CompletionRequest, FinishReason, ProviderTurn,
    Role, ToolUse, Usage,
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        Ok(ProviderTurn {
            text_blocks: vec![format!("MOCK: {reply}")],
            usage: Usage {
                input_tokens: 10,
                output_tokens: 10,
                ..Default::default()
            },
            finish: FinishReason::EndTurn,
            ..Default::default()
        })
    }
}

/// One scripted outcome for a `send` call.
pub enum ScriptedTurn {
    Turn(ProviderTurn),
    Error(ProviderError),
}

/// A pre-scripted mock provider.  Each call to `send` pops the next scripted
/// outcome from the front of the queue, so tests can specify exact turn
/// sequences — including tool calls and provider errors — without network
/// access.
pub struct ScriptedMockProvider {
    scripts: Mutex<Vec<ScriptedTurn>>,
    context_window: u32,
    /// Every `CompletionRequest` seen by this provider, for inspection.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<ScriptedTurn>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            context_window: 200_000,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shrink the claimed context window (compaction tests).
    pub fn with_context_window(mut self, window: u32) -> Self {
        self.context_window = window;
        self
    }

    /// Convenience: a single text reply with the given usage.
    pub fn text_turn(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> ScriptedTurn {
        ScriptedTurn::Turn(ProviderTurn {
            text_blocks: vec![text.into()],
            usage: Usage {
                input_tokens,
                output_tokens,
                ..Default::default()
            },
            finish: FinishReason::EndTurn,
            ..Default::default()
        })
    }

    /// Convenience: a turn requesting the given tool uses.
    pub fn tool_turn(uses: Vec<(&str, &str, serde_json::Value)>) -> ScriptedTurn {
        ScriptedTurn::Turn(ProviderTurn {
            tool_uses: uses
                .into_iter()
                .map(|(id, name, args)| ToolUse {
                    id: id.into(),
                    name: name.into(),
                    args,
                })
                .collect(),
            usage: Usage {
                input_tokens: 5,
                output_tokens: 5,
                ..Default::default()
            },
            finish: FinishReason::ToolUse,
            ..Default::default()
        })
    }

    /// Convenience: provider that always returns one text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_turn(reply, 5, 5)])
    }
}

#[async_trait]
impl Provider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        self.requests.lock().unwrap().push(req);
        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                return Ok(ProviderTurn {
                    text_blocks: vec!["[no more scripts]".into()],
                    finish: FinishReason::EndTurn,
                    ..Default::default()
                });
            }
            scripts.remove(0)
        };
        match next {
            ScriptedTurn::Turn(t) => Ok(t),
            ScriptedTurn::Error(e) => Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
