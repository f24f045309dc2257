// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One subscription account as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix seconds.  Monotonic across refreshes of the same
    /// credential — a refresh response that would move it backwards is
    /// clamped.
    pub expires_at: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_uuid: Option<String>,
}

/// Multi-account credential file: `{"default": "alias", "accounts": {...}}`.
///
/// `BTreeMap` keeps aliases in lexical order, which is also the promotion
/// order when the default account is removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub accounts: BTreeMap<String, CredentialRecord>,
}

impl CredentialFile {
    /// Parse either on-disk schema: the multi-account object or the legacy
    /// single-account record.  The schemas are told apart by shape — an
    /// `accounts` key marks the multi form (even when the map is empty).
    /// Legacy files upgrade to a multi-account file whose one alias derives
    /// from the record's email; the upgrade is written back on the next
    /// store mutation.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let is_multi = value
            .as_object()
            .map(|o| o.contains_key("accounts") || o.is_empty())
            .unwrap_or(false);
        if is_multi {
            return serde_json::from_value(value);
        }
        let single: CredentialRecord = serde_json::from_value(value)?;
        let alias = alias_from_email(&single.email);
        let mut accounts = BTreeMap::new();
        accounts.insert(alias.clone(), single);
        Ok(CredentialFile {
            default: Some(alias),
            accounts,
        })
    }

    /// Assign a free alias for `email`: the local part, suffixed `-2`, `-3`,
    /// … while taken.
    pub fn free_alias(&self, email: &str) -> String {
        let base = alias_from_email(email);
        if !self.accounts.contains_key(&base) {
            return base;
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.accounts.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Derive an alias from an email address: the local part, lowercased, with
/// anything outside `[a-z0-9._-]` replaced by `-`.
pub(crate) fn alias_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let alias: String = local
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if alias.is_empty() {
        "account".into()
    } else {
        alias
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
