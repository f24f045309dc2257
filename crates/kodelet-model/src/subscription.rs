// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic subscription driver: the Messages API wire signed with a
//! rotating OAuth bearer from the credential store instead of an API key.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use kodelet_auth::CredentialStore;

use crate::{
    anthropic::{build_request_body, read_turn, ANTHROPIC_VERSION, DEFAULT_BASE_URL},
    error::ProviderError,
    provider::Provider,
    ratelimit::RateLimitInfo,
    CompletionRequest, ProviderTurn,
};

/// Beta header that switches the Messages endpoint into OAuth mode.
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub struct SubscriptionProvider {
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    /// Account alias; `None` resolves to the store default.
    account: Option<String>,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
}

impl SubscriptionProvider {
    pub fn new(
        model: String,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        account: Option<String>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            account,
            credentials,
            client: reqwest::Client::new(),
        }
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        let (bearer, email) = self
            .credentials
            .get_valid_token(self.account.as_deref())
            .await
            .map_err(|e| match e.is_retryable() {
                true => ProviderError::Retryable {
                    message: e.to_string(),
                    retry_after: None,
                },
                false => ProviderError::AuthExpired(e.to_string()),
            })?;
        debug!(account = %email, "using subscription bearer");
        Ok(bearer)
    }
}

#[async_trait]
impl Provider for SubscriptionProvider {
    fn name(&self) -> &str {
        "anthropic-subscription"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let bearer = self.bearer().await?;
        let model = req.model_override.as_deref().unwrap_or(&self.model);
        let body = build_request_body(model, self.max_tokens, self.temperature, &req);

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .bearer_auth(&bearer)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", OAUTH_BETA)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        read_turn(resp).await
    }
}

/// Query the usage windows for a subscription account.
///
/// Issues a minimal single-token completion with the account's bearer and
/// reads the rate-limit headers off the response.  Headers arrive on both
/// success and 429 responses, so a rejected probe still yields a view.
pub async fn probe_rate_limits(
    credentials: &CredentialStore,
    account: Option<&str>,
    base_url: Option<&str>,
    model: &str,
) -> anyhow::Result<RateLimitInfo> {
    let (bearer, _) = credentials.get_valid_token(account).await?;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "model": model,
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "hi" }],
    });

    let resp = client
        .post(format!(
            "{}/v1/messages",
            base_url.unwrap_or(DEFAULT_BASE_URL)
        ))
        .bearer_auth(&bearer)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("anthropic-beta", OAUTH_BETA)
        .json(&body)
        .send()
        .await?;

    Ok(RateLimitInfo::from_headers(resp.headers()))
}
