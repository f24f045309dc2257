// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! OAuth 2.0 Device Authorization Grant (RFC 8628) — login flow for the
//! Copilot provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Token response from the device-code polling endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub scope: String,
}

/// Initiate device authorization by POSTing to the device auth endpoint.
pub async fn initiate_device_auth(
    client: &reqwest::Client,
    device_auth_url: &str,
    client_id: &str,
    scope: &str,
) -> anyhow::Result<DeviceCodeResponse> {
    let resp = client
        .post(device_auth_url)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("scope", scope)])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("device authorization failed ({status}): {text}");
    }

    Ok(resp.json().await?)
}

/// Poll the token endpoint until the user completes authorization or the
/// code expires.  `authorization_pending` retries at the current interval;
/// `slow_down` increases the interval by 5 seconds as the RFC requires.
pub async fn poll_device_code(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    device: &DeviceCodeResponse,
) -> anyhow::Result<DeviceTokenResponse> {
    let mut poll_interval = Duration::from_secs(device.interval.max(1));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);

    loop {
        tokio::time::sleep(poll_interval).await;

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("device code expired before user completed authorization");
        }

        let resp = client
            .post(token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("client_id", client_id),
                ("device_code", &device.device_code),
            ])
            .send()
            .await?;

        let text = resp.text().await.unwrap_or_default();

        // GitHub answers 200 for both success and pending; distinguish by body.
        if text.contains("authorization_pending") {
            continue;
        }
        if text.contains("slow_down") {
            poll_interval += Duration::from_secs(5);
            continue;
        }
        if let Ok(token) = serde_json::from_str::<DeviceTokenResponse>(&text) {
            return Ok(token);
        }

        anyhow::bail!("device code token request failed: {text}");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_code_response_defaults_interval_to_5() {
        let raw = r#"{
            "device_code": "dc",
            "user_code": "ABCD-1234",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900
        }"#;
        let d: DeviceCodeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(d.interval, 5);
        assert_eq!(d.user_code, "ABCD-1234");
    }

    #[test]
    fn device_token_response_parses() {
        let t: DeviceTokenResponse =
            serde_json::from_str(r#"{"access_token":"gho_x","scope":"read:user"}"#).unwrap();
        assert_eq!(t.access_token, "gho_x");
    }
}
