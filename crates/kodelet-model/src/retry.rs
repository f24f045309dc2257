// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded exponential backoff with jitter for retryable provider errors.

use std::time::Duration;

use rand::Rng;

/// Retry schedule: base 500 ms doubling per attempt, capped at 30 s, at most
/// 5 attempts, with up to 25% random jitter added so that parallel threads
/// do not retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).  A provider-supplied
    /// `retry_after` takes precedence over the computed backoff, still
    /// subject to the cap.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(ra) = retry_after {
            return ra.min(self.cap);
        }
        let exp = self
            .base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.cap);
        let jitter_budget = capped.as_millis() as u64 / 4;
        let jitter = if jitter_budget == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_budget)
        };
        (capped + Duration::from_millis(jitter)).min(self.cap + self.cap / 4)
    }

    /// True when another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
