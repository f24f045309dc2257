// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Subscription rate-limit windows (5-hour and 7-day) reported via response
//! headers, and the probe that queries them for an account.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Status of one rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Allowed,
    AllowedWarning,
    Rejected,
    #[default]
    Unknown,
}

impl WindowStatus {
    fn parse(s: &str) -> Self {
        match s {
            "allowed" => WindowStatus::Allowed,
            "allowed_warning" => WindowStatus::AllowedWarning,
            "rejected" => WindowStatus::Rejected,
            _ => WindowStatus::Unknown,
        }
    }
}

/// One provider-reported usage bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub status: WindowStatus,
    /// Fraction of the window consumed (0.0–1.0), when reported.
    pub utilization: Option<f64>,
    /// When the window resets.
    pub resets_at: Option<DateTime<Utc>>,
}

/// The 5-hour and 7-day windows for a subscription account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub five_hour: RateLimitWindow,
    pub seven_day: RateLimitWindow,
}

impl RateLimitInfo {
    /// Parse the `anthropic-ratelimit-unified-{5h,7d}-*` response headers.
    /// Missing or unparseable headers leave the corresponding field at its
    /// `Unknown`/`None` default.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        Self {
            five_hour: parse_window(headers, "5h"),
            seven_day: parse_window(headers, "7d"),
        }
    }

    /// True when any field was actually reported.
    pub fn any_reported(&self) -> bool {
        self.five_hour != RateLimitWindow::default()
            || self.seven_day != RateLimitWindow::default()
    }
}

fn parse_window(headers: &reqwest::header::HeaderMap, bucket: &str) -> RateLimitWindow {
    let get = |suffix: &str| -> Option<String> {
        headers
            .get(format!("anthropic-ratelimit-unified-{bucket}-{suffix}"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let status = get("status")
        .map(|s| WindowStatus::parse(&s))
        .unwrap_or_default();
    let utilization = get("utilization").and_then(|s| s.parse::<f64>().ok());
    let resets_at = get("reset")
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    RateLimitWindow {
        status,
        utilization,
        resets_at,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_both_windows() {
        let h = headers(&[
            ("anthropic-ratelimit-unified-5h-status", "allowed"),
            ("anthropic-ratelimit-unified-5h-utilization", "0.42"),
            ("anthropic-ratelimit-unified-5h-reset", "1750000000"),
            ("anthropic-ratelimit-unified-7d-status", "allowed_warning"),
            ("anthropic-ratelimit-unified-7d-utilization", "0.91"),
        ]);
        let info = RateLimitInfo::from_headers(&h);
        assert_eq!(info.five_hour.status, WindowStatus::Allowed);
        assert_eq!(info.five_hour.utilization, Some(0.42));
        assert!(info.five_hour.resets_at.is_some());
        assert_eq!(info.seven_day.status, WindowStatus::AllowedWarning);
        assert!(info.seven_day.resets_at.is_none());
    }

    #[test]
    fn missing_headers_yield_unknown() {
        let info = RateLimitInfo::from_headers(&HeaderMap::new());
        assert_eq!(info.five_hour.status, WindowStatus::Unknown);
        assert_eq!(info.seven_day.status, WindowStatus::Unknown);
        assert!(!info.any_reported());
    }

    #[test]
    fn unrecognized_status_string_is_unknown() {
        let h = headers(&[("anthropic-ratelimit-unified-5h-status", "maybe")]);
        let info = RateLimitInfo::from_headers(&h);
        assert_eq!(info.five_hour.status, WindowStatus::Unknown);
    }

    #[test]
    fn rejected_status_parses() {
        let h = headers(&[("anthropic-ratelimit-unified-7d-status", "rejected")]);
        let info = RateLimitInfo::from_headers(&h);
        assert_eq!(info.seven_day.status, WindowStatus::Rejected);
        assert!(info.any_reported());
    }
}
