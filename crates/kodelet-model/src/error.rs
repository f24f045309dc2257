// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Provider-level error taxonomy surfaced to the agent loop.
///
/// The loop's recovery policy is a function of the kind, not of the call
/// site: `Retryable` is absorbed by bounded backoff, `AuthExpired` triggers
/// a credential refresh plus one retry, `ContextOverflow` triggers
/// compaction plus one retry, `Fatal` aborts the turn.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("retryable provider error: {message}")]
    Retryable {
        message: String,
        /// Provider-suggested delay from a `Retry-After` header.
        retry_after: Option<Duration>,
    },
    #[error("authorization expired: {0}")]
    AuthExpired(String),
    #[error("request exceeds the model context window: {0}")]
    ContextOverflow(String),
    #[error("provider rejected the request: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Classify an HTTP error response.
    ///
    /// 429 and 5xx are retryable (the former honoring `Retry-After`);
    /// 401/403 means the bearer is stale; a 400 whose body mentions the
    /// context window is an overflow; anything else is fatal.
    pub fn from_http(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            return ProviderError::Retryable {
                message: format!("{status}: {body}"),
                retry_after: retry_after.map(Duration::from_secs),
            };
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return ProviderError::AuthExpired(format!("{status}: {body}"));
        }
        if status.as_u16() == 400 && is_context_overflow_body(body) {
            return ProviderError::ContextOverflow(body.to_string());
        }
        ProviderError::Fatal(format!("{status}: {body}"))
    }

    /// Network-level failures (connection reset, timeout) are retryable.
    pub fn from_transport(err: reqwest::Error) -> Self {
        ProviderError::Retryable {
            message: err.to_string(),
            retry_after: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

/// Providers phrase context-window rejections differently; match the
/// substrings observed across the Anthropic, OpenAI, and Google error
/// bodies.
fn is_context_overflow_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context window")
        || lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("prompt is too long")
        || lower.contains("exceeds the maximum number of tokens")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_retryable_with_delay() {
        let e = ProviderError::from_http(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow", Some(7));
        match e {
            ProviderError::Retryable { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected Retryable, got {other:?}"),
        }
    }

    #[test]
    fn status_500_is_retryable() {
        let e = ProviderError::from_http(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "", None);
        assert!(e.is_retryable());
    }

    #[test]
    fn status_401_is_auth_expired() {
        let e = ProviderError::from_http(reqwest::StatusCode::UNAUTHORIZED, "expired", None);
        assert!(matches!(e, ProviderError::AuthExpired(_)));
    }

    #[test]
    fn status_400_with_context_phrase_is_overflow() {
        let e = ProviderError::from_http(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"prompt is too long: 210000 tokens > 200000 maximum"}}"#,
            None,
        );
        assert!(matches!(e, ProviderError::ContextOverflow(_)));
    }

    #[test]
    fn status_400_without_context_phrase_is_fatal() {
        let e = ProviderError::from_http(
            reqwest::StatusCode::BAD_REQUEST,
            "tool schema rejected",
            None,
        );
        assert!(matches!(e, ProviderError::Fatal(_)));
    }
}
