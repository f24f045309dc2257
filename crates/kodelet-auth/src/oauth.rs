// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! OAuth helper types, code exchange, and token refresh.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// OAuth client id used for the subscription provider's code+PKCE flow.
pub const SUBSCRIPTION_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
/// Authorization endpoint for the subscription provider.
pub const SUBSCRIPTION_AUTH_URL: &str = "https://claude.ai/oauth/authorize";
/// Token endpoint for the subscription provider (exchange + refresh).
pub const SUBSCRIPTION_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
/// Redirect URI registered for the local-callback login flow.
pub const SUBSCRIPTION_REDIRECT_URI: &str = "http://localhost:54545/callback";
/// Scopes requested at login.
pub const SUBSCRIPTION_SCOPE: &str = "org:create_api_key user:profile user:inference";

/// Standard OAuth2 token response, extended with the account metadata the
/// subscription provider returns alongside the tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<OrgInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub email_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInfo {
    #[serde(default)]
    pub uuid: String,
}

/// Parameters for an authorization-code exchange.
pub struct AuthCodeRequest<'a> {
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub state: &'a str,
}

/// Exchange an authorization code for tokens (JSON body).
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    req: AuthCodeRequest<'_>,
) -> anyhow::Result<TokenResponse> {
    let body = serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": SUBSCRIPTION_CLIENT_ID,
        "code": req.code,
        "redirect_uri": SUBSCRIPTION_REDIRECT_URI,
        "code_verifier": req.code_verifier,
        "state": req.state,
    });

    let resp = client
        .post(token_url)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("token exchange failed ({status}): {text}");
    }

    Ok(resp.json().await?)
}

/// Seam through which the store refreshes tokens.  The production
/// implementation posts to the provider's token endpoint; tests substitute
/// a fake to observe refresh-request counts without network access.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, alias: &str, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

/// HTTP refresher posting `grant_type=refresh_token` as a form body.
pub struct HttpRefresher {
    client: reqwest::Client,
    token_url: String,
}

impl HttpRefresher {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
        }
    }
}

impl Default for HttpRefresher {
    fn default() -> Self {
        Self::new(SUBSCRIPTION_TOKEN_URL)
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, alias: &str, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", SUBSCRIPTION_CLIENT_ID),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed {
                alias: alias.to_string(),
                message: e.to_string(),
                invalid_grant: false,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // A 4xx carrying invalid_grant means the refresh token itself is
            // dead; the credential must be re-issued by a fresh login.  5xx
            // and malformed bodies stay retryable.
            let invalid_grant = status.is_client_error() && text.contains("invalid_grant");
            return Err(AuthError::RefreshFailed {
                alias: alias.to_string(),
                message: format!("{status}: {text}"),
                invalid_grant,
            });
        }

        resp.json().await.map_err(|e| AuthError::RefreshFailed {
            alias: alias.to_string(),
            message: format!("malformed token response: {e}"),
            invalid_grant: false,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
