// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kodelet_model::{Message, Usage};

/// Aggregated token and cost counters for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    /// Dollar cost at the model's catalog rates, accumulated per call.
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &Usage, cost_usd: f64) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cost_usd += cost_usd;
    }
}

/// A persisted conversation.
///
/// `messages` is the provider-native history; `tool_results` keeps the
/// structured payload of each tool call keyed by its call id so renderers
/// can re-display past runs without re-parsing assistant strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Structured tool results keyed by tool-call id.
    #[serde(default)]
    pub tool_results: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub usage: UsageTotals,
    /// Data URLs or paths of images attached as background context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub background_images: Vec<String>,
    /// Recipe tag when the conversation was started from a template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
}

impl ConversationRecord {
    /// Fresh record with a generated id.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
            summary: String::new(),
            messages: Vec::new(),
            tool_results: BTreeMap::new(),
            usage: UsageTotals::default(),
            background_images: Vec::new(),
            recipe: None,
        }
    }

    /// Bump `updated_at`, keeping it monotonic even if the wall clock
    /// stepped backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// First user message text, used for listings when no summary was set.
    pub fn first_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == kodelet_model::Role::User)
            .and_then(|m| m.as_text())
    }

    pub fn to_summary(&self) -> ConversationSummary {
        let preview = if self.summary.is_empty() {
            self.first_user_text().unwrap_or("").chars().take(80).collect()
        } else {
            self.summary.clone()
        };
        ConversationSummary {
            id: self.id.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            summary: preview,
            message_count: self.messages.len(),
            cost_usd: self.usage.cost_usd,
        }
    }
}

/// Listing row returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: String,
    pub message_count: usize,
    pub cost_usd: f64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
