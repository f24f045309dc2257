// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Subscription-credential lifecycle: OAuth token issuance, refresh, and
//! rotation across multiple named accounts.
//!
//! The store holds per-provider credentials on disk
//! (`~/.kodelet/anthropic-subscription.json`) and vends a valid bearer token
//! on demand, refreshing transparently when a credential is inside its
//! refresh window.

mod copilot;
mod device;
mod error;
mod oauth;
mod pkce;
mod record;
mod store;

pub use copilot::{CopilotCredential, CopilotStore};
pub use device::{initiate_device_auth, poll_device_code};
pub use error::AuthError;
pub use oauth::{
    exchange_code, AuthCodeRequest, HttpRefresher, TokenRefresher, TokenResponse,
    SUBSCRIPTION_AUTH_URL, SUBSCRIPTION_CLIENT_ID, SUBSCRIPTION_REDIRECT_URI,
    SUBSCRIPTION_SCOPE, SUBSCRIPTION_TOKEN_URL,
};
pub use pkce::{build_auth_url, compute_code_challenge, generate_code_verifier, generate_state};
pub use record::{CredentialFile, CredentialRecord};
pub use store::{CredentialStore, REFRESH_WINDOW_SECS};
