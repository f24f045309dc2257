// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{
    catalog::{self, ModelPrice},
    error::ProviderError,
    CompletionRequest, Message, ProviderTurn,
};

/// Capability set every model driver implements.
///
/// One operation matters: given a system prompt, message history, and tool
/// schemas, return the assistant's text blocks, tool-use intents, usage, and
/// finish reason.  The remaining methods are catalog lookups with sensible
/// defaults so a driver only overrides what it knows better.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider tag as it appears in config and conversation records.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and wait for the full turn.
    ///
    /// Cancellation is cooperative: dropping the future aborts the
    /// underlying HTTP request.
    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError>;

    /// Estimate the token count of a message history.
    ///
    /// The default chars/4 approximation is acceptable for budget decisions;
    /// drivers with an exact counter may override.
    fn count_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.approx_tokens()).sum()
    }

    /// Context window of the current model, from the catalog.
    fn context_window(&self) -> u32 {
        catalog::lookup(self.model_name())
            .map(|e| e.context_window)
            .unwrap_or(128_000)
    }

    /// Maximum output tokens per completion, from the catalog.
    fn max_output_tokens(&self) -> u32 {
        catalog::lookup(self.model_name())
            .map(|e| e.max_output_tokens)
            .unwrap_or(4096)
    }

    /// Per-MTok pricing for the current model.  Unknown models price at
    /// zero so cost accounting degrades gracefully.
    fn price(&self) -> ModelPrice {
        catalog::lookup(self.model_name())
            .map(|e| e.price)
            .unwrap_or_default()
    }
}
