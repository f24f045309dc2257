// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::{ConversationRecord, ConversationStore, ConversationSummary, QueryOptions, StoreError};

/// Flat-file backend: one `<id>.json` per conversation.
///
/// Writes go to a temp file whose name carries a timestamp suffix (so a
/// crash mid-write never tears the target), then rename over the real
/// file.  Readers see either the old or the new record.
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read_all(&self) -> Result<Vec<ConversationRecord>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A torn or foreign file must not hide the rest.
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation file");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        let target = self.path_for(&record.id);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            record.id,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &target)?;
        debug!(id = %record.id, path = %target.display(), "saved conversation");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        let raw = match std::fs::read_to_string(self.path_for(id)) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, options: &QueryOptions) -> Result<Vec<ConversationSummary>, StoreError> {
        let records = self.read_all()?;
        Ok(crate::query::apply_query(records, options))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
