// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod catalog;
pub mod ratelimit;
pub mod registry;
pub(crate) mod openai_compat;
mod anthropic;
mod copilot;
mod error;
mod google;
mod mock;
mod provider;
mod retry;
mod subscription;
mod types;

pub use anthropic::AnthropicProvider;
pub use catalog::{ModelCatalogEntry, ModelPrice};
pub use copilot::CopilotProvider;
pub use error::ProviderError;
pub use google::GoogleProvider;
pub use mock::{MockProvider, ScriptedMockProvider, ScriptedTurn};
pub use provider::Provider;
pub use ratelimit::{RateLimitInfo, RateLimitWindow, WindowStatus};
pub use registry::{get_driver, DriverMeta, DRIVERS};
pub use retry::RetryPolicy;
pub use subscription::{probe_rate_limits, SubscriptionProvider};
pub use types::*;

use std::sync::Arc;

use anyhow::bail;

use kodelet_auth::{CopilotStore, CredentialStore};
use kodelet_config::ModelConfig;

/// Construct a shared [`Provider`] from configuration.
///
/// Selects the driver implementation based on `cfg.provider`.  The
/// credential store is only consulted by the subscription driver; the
/// Copilot driver reads its own credential file.
pub fn from_config(
    cfg: &ModelConfig,
    credentials: Arc<CredentialStore>,
) -> anyhow::Result<Arc<dyn Provider>> {
    let key = || resolve_api_key(cfg);

    match cfg.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            cfg.name.clone(),
            key(),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "anthropic-subscription" => Ok(Arc::new(SubscriptionProvider::new(
            cfg.name.clone(),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            cfg.account.clone(),
            credentials,
        ))),
        "openai" => Ok(Arc::new(openai_compat::OpenAiCompatProvider::new(
            "openai",
            cfg.name.clone(),
            key(),
            cfg.base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
        ))),
        "google" => Ok(Arc::new(GoogleProvider::new(
            cfg.name.clone(),
            key(),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "copilot" => Ok(Arc::new(CopilotProvider::new(
            cfg.name.clone(),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            CopilotStore::open_default(),
        ))),
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!("unknown provider {other:?}; known: {}", known_ids()),
    }
}

/// Resolve the API key: explicit config value, then the configured env var,
/// then the driver registry's canonical env var.
fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        if let Ok(v) = std::env::var(var) {
            return Some(v);
        }
    }
    registry::get_driver(&cfg.provider)
        .and_then(|d| d.default_api_key_env)
        .and_then(|var| std::env::var(var).ok())
}

fn known_ids() -> String {
    registry::DRIVERS
        .iter()
        .map(|d| d.id)
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
