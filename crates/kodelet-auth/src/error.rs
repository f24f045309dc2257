// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// Error kinds surfaced by the credential store.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no account named {0:?}")]
    NotFound(String),
    #[error("no default account configured; run `kodelet accounts add` first")]
    NoDefault,
    #[error("an account named {0:?} already exists")]
    Conflict(String),
    /// Token refresh failed.  `invalid_grant` means the refresh token itself
    /// was rejected (revoked or expired) and the credential must be
    /// re-issued via a fresh login; anything else is transient and the
    /// caller may retry.
    #[error("token refresh failed for {alias:?}: {message}")]
    RefreshFailed {
        alias: String,
        message: String,
        invalid_grant: bool,
    },
    #[error("credential storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("credential file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl AuthError {
    /// True when retrying the same operation may succeed (network flake,
    /// provider 5xx).  `invalid_grant` refreshes are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshFailed {
                invalid_grant: false,
                ..
            }
        )
    }
}
