// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use kodelet_auth::CredentialStore;
use kodelet_config::Config;
use kodelet_model::Provider;
use kodelet_store::ConversationStore;

/// Process-wide service container.
///
/// Constructed once at startup and passed explicitly into thread
/// constructors; tests substitute temp-dir stores and mock providers.
pub struct Runtime {
    pub config: Config,
    pub credentials: Arc<CredentialStore>,
    pub store: Arc<dyn ConversationStore>,
}

impl Runtime {
    /// Production wiring rooted under `~/.kodelet`.
    pub fn from_config(config: Config) -> anyhow::Result<Arc<Self>> {
        let credentials = Arc::new(CredentialStore::open_default());
        let store = kodelet_store::open_default(config.store)?;
        Ok(Arc::new(Self {
            config,
            credentials,
            store,
        }))
    }

    /// Explicit wiring for tests and embedders.
    pub fn new(
        config: Config,
        credentials: Arc<CredentialStore>,
        store: Arc<dyn ConversationStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            credentials,
            store,
        })
    }

    /// Build the configured provider.
    pub fn provider(&self) -> anyhow::Result<Arc<dyn Provider>> {
        kodelet_model::from_config(&self.config.model, Arc::clone(&self.credentials))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
