// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Credential file for the code-assistant (Copilot) provider.
//!
//! Unlike the subscription store this is a single-account file: the GitHub
//! OAuth access token obtained via the device flow, plus the short-lived
//! Copilot bearer it was last exchanged for.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CopilotCredential {
    /// Long-lived GitHub OAuth token from the device flow.
    pub access_token: String,
    /// Short-lived upstream bearer exchanged from `access_token`.
    #[serde(default)]
    pub copilot_token: String,
    #[serde(default)]
    pub scope: String,
    /// Expiry of `copilot_token` as unix seconds.
    #[serde(default)]
    pub copilot_expires: u64,
}

impl CopilotCredential {
    /// True when the exchanged Copilot bearer is still usable.
    pub fn copilot_token_valid(&self) -> bool {
        !self.copilot_token.is_empty() && self.copilot_expires > now_unix() + 60
    }
}

pub struct CopilotStore {
    path: PathBuf,
}

impl CopilotStore {
    pub fn open_default() -> Self {
        Self {
            path: kodelet_config::kodelet_dir().join("copilot-subscription.json"),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CopilotCredential, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AuthError::NotFound("copilot".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, cred: &CopilotCredential) -> Result<(), AuthError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(cred)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CopilotStore::new(dir.path().join("copilot.json"));
        let cred = CopilotCredential {
            access_token: "gho_abc".into(),
            copilot_token: "cop_xyz".into(),
            scope: "read:user".into(),
            copilot_expires: now_unix() + 1800,
        };
        store.save(&cred).unwrap();
        assert_eq!(store.load().unwrap(), cred);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CopilotStore::new(dir.path().join("copilot.json"));
        assert!(matches!(
            store.load().unwrap_err(),
            AuthError::NotFound(_)
        ));
    }

    #[test]
    fn expired_copilot_token_is_invalid() {
        let cred = CopilotCredential {
            access_token: "gho".into(),
            copilot_token: "cop".into(),
            scope: String::new(),
            copilot_expires: 1,
        };
        assert!(!cred.copilot_token_valid());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CopilotStore::new(dir.path().join("copilot.json"));
        store.delete().unwrap();
        store.delete().unwrap();
    }
}
