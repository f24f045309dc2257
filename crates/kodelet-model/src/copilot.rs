// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Copilot driver: a GitHub OAuth token is exchanged for a short-lived
//! upstream bearer, and the underlying wire is OpenAI-compatible.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use kodelet_auth::{CopilotCredential, CopilotStore};

use crate::{
    error::ProviderError, openai_compat::OpenAiCompatProvider, provider::Provider,
    CompletionRequest, ProviderTurn,
};

const TOKEN_EXCHANGE_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const API_BASE_URL: &str = "https://api.githubcopilot.com";

pub struct CopilotProvider {
    inner: OpenAiCompatProvider,
    store: CopilotStore,
    /// Serializes the token exchange so parallel sends refresh once.
    exchange_lock: Mutex<()>,
    client: reqwest::Client,
}

impl CopilotProvider {
    pub fn new(
        model: String,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        store: CopilotStore,
    ) -> Self {
        let base = base_url.unwrap_or_else(|| API_BASE_URL.into());
        Self {
            inner: OpenAiCompatProvider::new(
                "copilot",
                model,
                None,
                &base,
                max_tokens,
                temperature,
                vec![("Copilot-Integration-Id".into(), "kodelet".into())],
            ),
            store,
            exchange_lock: Mutex::new(()),
            client: reqwest::Client::new(),
        }
    }

    /// A valid Copilot bearer, exchanging the stored GitHub token when the
    /// cached one is absent or expiring.
    async fn copilot_bearer(&self) -> Result<String, ProviderError> {
        let _guard = self.exchange_lock.lock().await;
        let mut cred = self
            .store
            .load()
            .map_err(|e| ProviderError::AuthExpired(e.to_string()))?;
        if cred.copilot_token_valid() {
            return Ok(cred.copilot_token);
        }

        debug!("exchanging github token for copilot bearer");
        let resp = self
            .client
            .get(TOKEN_EXCHANGE_URL)
            .header("Authorization", format!("token {}", cred.access_token))
            .header("Accept", "application/json")
            .header("User-Agent", "kodelet")
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(status, &text, None));
        }

        #[derive(serde::Deserialize)]
        struct ExchangeResponse {
            token: String,
            expires_at: u64,
        }
        let exchanged: ExchangeResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("malformed token exchange: {e}")))?;

        cred.copilot_token = exchanged.token.clone();
        cred.copilot_expires = exchanged.expires_at;
        if let Err(e) = self.store.save(&cred) {
            // A failed cache write costs one extra exchange next time.
            tracing::warn!(error = %e, "failed to persist exchanged copilot token");
        }
        Ok(exchanged.token)
    }
}

#[async_trait]
impl Provider for CopilotProvider {
    fn name(&self) -> &str {
        "copilot"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let bearer = self.copilot_bearer().await?;
        self.inner.send_with_bearer(Some(&bearer), &req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
