// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Auto-compaction: summarize older history into a seed message when
//! context utilization crosses the configured threshold.

use std::sync::Arc;

use tracing::{debug, warn};

use kodelet_model::{
    CompletionRequest, Message, MessageContent, Provider, ProviderError, Role, Usage,
};

use crate::prompts::COMPACTION_PROMPT;

/// Post-compaction histories must fit within this fraction of the window.
const POST_COMPACTION_FRACTION: f32 = 0.5;

/// Compaction attempts before the thread gives up with `ContextOverflow`.
const MAX_ATTEMPTS: u32 = 2;

pub struct Compactor {
    /// Utilization fraction that triggers compaction.  0.0 fires every
    /// turn; 1.0 never fires.
    pub ratio: f32,
    /// Recent non-system messages preserved verbatim.
    pub keep_recent: usize,
    pub enabled: bool,
}

impl Compactor {
    pub fn new(ratio: f32, keep_recent: usize, enabled: bool) -> Self {
        Self {
            ratio,
            keep_recent,
            enabled,
        }
    }

    /// Evaluate the trigger after a provider call.
    pub fn should_compact(&self, used_tokens: usize, context_window: u32) -> bool {
        if !self.enabled || context_window == 0 {
            return false;
        }
        if self.ratio >= 1.0 {
            return false;
        }
        (used_tokens as f32) / (context_window as f32) >= self.ratio
    }

    /// Summarize the older portion of `history` and rebuild it as one
    /// prior-context summary entry plus the preserved recent tail.
    ///
    /// If the summary call itself overflows, the older portion is halved
    /// and retried; after [`MAX_ATTEMPTS`] failures the overflow is
    /// surfaced to the caller as fatal.  Returns the new history and the
    /// usage consumed by the compaction call(s).
    pub async fn compact(
        &self,
        provider: &Arc<dyn Provider>,
        history: &[Message],
    ) -> Result<(Vec<Message>, Usage), ProviderError> {
        let window = provider.context_window();
        let (mut old, tail) = self.split_at_boundary(history);
        let mut usage_total = Usage::default();

        if old.is_empty() {
            // Nothing summarizable; the tail alone is the history.
            return Ok((tail, usage_total));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let summary_request = CompletionRequest {
                system: COMPACTION_PROMPT.to_string(),
                messages: vec![Message::user(serialize_history(&old))],
                ..Default::default()
            };

            match provider.send(summary_request).await {
                Ok(turn) => {
                    usage_total.add(&turn.usage);
                    let summary_msg = Message::system(format!(
                        "Prior-context summary (earlier conversation was compacted):\n\n{}",
                        turn.text()
                    ));
                    let kept = shrink_tail_to_budget(tail.clone(), provider, &summary_msg, window);
                    let mut rebuilt = Vec::with_capacity(kept.len() + 1);
                    rebuilt.push(summary_msg);
                    rebuilt.extend(kept);
                    debug!(
                        before = history.len(),
                        after = rebuilt.len(),
                        attempt,
                        "compacted conversation history"
                    );
                    return Ok((rebuilt, usage_total));
                }
                Err(ProviderError::ContextOverflow(msg)) if attempt < MAX_ATTEMPTS => {
                    // The summarize call is itself too large; drop the
                    // older half of the summarizable section and retry.
                    warn!(attempt, "compaction call overflowed; halving input");
                    let half = old.len() / 2;
                    old = old.split_off(half);
                    if old.is_empty() {
                        return Err(ProviderError::ContextOverflow(msg));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Split history into (older, recent-tail), never splitting a
    /// tool-use/tool-result group: a tail that would start with a tool
    /// message is extended backwards to a turn boundary, or — when that
    /// would leave nothing to summarize — the whole group is summarized
    /// instead.  Orphaned results after a summarized-away tool-use make
    /// providers reject the next request.
    fn split_at_boundary(&self, history: &[Message]) -> (Vec<Message>, Vec<Message>) {
        let is_tool = |m: &Message| {
            matches!(
                m.content,
                MessageContent::ToolResult { .. } | MessageContent::ToolCall { .. }
            )
        };
        let non_system: Vec<Message> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        if non_system.len() <= self.keep_recent {
            return (Vec::new(), non_system);
        }
        let desired = non_system.len() - self.keep_recent;
        let mut split = desired;
        while split > 0 && is_tool(&non_system[split]) {
            split -= 1;
        }
        if split == 0 {
            // Everything before the desired point is one tool group; push
            // the split forward so the group is summarized whole.
            split = desired;
            while split < non_system.len() && is_tool(&non_system[split]) {
                split += 1;
            }
        }
        let (old, tail) = non_system.split_at(split);
        (old.to_vec(), tail.to_vec())
    }
}

/// Drop the oldest tail entries (whole tool groups included) until the
/// rebuilt history fits the post-compaction budget.
fn shrink_tail_to_budget(
    mut tail: Vec<Message>,
    provider: &Arc<dyn Provider>,
    summary: &Message,
    window: u32,
) -> Vec<Message> {
    let budget = (window as f32 * POST_COMPACTION_FRACTION) as usize;
    loop {
        let total = provider.count_tokens(std::slice::from_ref(summary))
            + provider.count_tokens(&tail);
        if total <= budget || tail.is_empty() {
            return tail;
        }
        tail.remove(0);
        // Remove any tool messages left dangling at the new front.
        while matches!(
            tail.first().map(|m| &m.content),
            Some(MessageContent::ToolResult { .. }) | Some(MessageContent::ToolCall { .. })
        ) {
            tail.remove(0);
        }
    }
}

/// Plain-text serialization of history for the compaction prompt.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::ContentParts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        kodelet_model::ContentPart::Text { text } => text.clone(),
                        kodelet_model::ContentPart::Image { .. } => "[image]".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
                MessageContent::ToolCall { function, .. } => {
                    format!("[tool_call: {}({})]", function.name, function.arguments)
                }
                MessageContent::ToolResult { content, is_error, .. } => {
                    if *is_error {
                        format!("[tool_error: {content}]")
                    } else {
                        format!("[tool_result: {content}]")
                    }
                }
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
