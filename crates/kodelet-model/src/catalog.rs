// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// Per-MTok pricing in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    #[serde(default)]
    pub input_per_mtok: f64,
    #[serde(default)]
    pub output_per_mtok: f64,
    #[serde(default)]
    pub cache_write_per_mtok: f64,
    #[serde(default)]
    pub cache_read_per_mtok: f64,
}

impl ModelPrice {
    /// Dollar cost of a usage record at these rates.
    pub fn cost(&self, usage: &crate::Usage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok
            + usage.cache_creation_tokens as f64 * self.cache_write_per_mtok
            + usage.cache_read_tokens as f64 * self.cache_read_per_mtok)
            / 1_000_000.0
    }
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCatalogEntry {
    /// Model identifier as sent on the wire (e.g. "claude-sonnet-4-5")
    pub id: String,
    /// Provider tag: "anthropic" | "openai" | "google" | "copilot"
    pub provider: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    /// Whether the model accepts image input
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub price: ModelPrice,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a single model by id.  Returns `None` if not in the catalog.
pub fn lookup(model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog().into_iter().find(|e| e.id == model_id)
}

/// Context window for a model, with a fallback for unknown ids.
pub fn context_window(model_id: &str, default: u32) -> u32 {
    lookup(model_id).map(|e| e.context_window).unwrap_or(default)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
