// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Durable, queryable record of conversations with concurrent live-tail
//! streaming.
//!
//! Two backends satisfy the same contract: a flat-file directory (one JSON
//! file per conversation, atomic temp+rename) and SQLite.  One writer per
//! conversation id (the owning thread); any number of readers; no inter-id
//! locks.

mod file;
mod query;
mod record;
mod sqlite;
mod stream;

pub use file::FileConversationStore;
pub use record::{ConversationRecord, ConversationSummary, UsageTotals};
pub use sqlite::SqliteConversationStore;
pub use stream::{stream_live_updates, StreamOptions, DEFAULT_POLL_INTERVAL};

use std::sync::Arc;

use async_trait::async_trait;

/// Error kinds surfaced by a conversation store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no conversation with id {0:?}")]
    NotFound(String),
    #[error("conversation storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Sort key for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Updated,
    Created,
}

/// Filters and pagination for [`ConversationStore::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub provider: Option<String>,
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    /// Case-insensitive substring match against the summary and first
    /// message text.
    pub search: Option<String>,
    pub sort: SortKey,
    pub ascending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Contract shared by the file and SQLite backends.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent upsert keyed by `record.id`.
    async fn save(&self, record: &ConversationRecord) -> Result<(), StoreError>;
    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError>;
    /// Deleting an absent id succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    async fn query(&self, options: &QueryOptions) -> Result<Vec<ConversationSummary>, StoreError>;
    /// The id that default sorting (updated, descending) puts first.
    async fn most_recent_id(&self) -> Result<String, StoreError> {
        let opts = QueryOptions {
            limit: Some(1),
            ..Default::default()
        };
        self.query(&opts)
            .await?
            .into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| StoreError::NotFound("<most recent>".into()))
    }
}

/// Build the configured backend rooted under `~/.kodelet`.
pub fn open_default(
    backend: kodelet_config::StoreBackend,
) -> Result<Arc<dyn ConversationStore>, StoreError> {
    let base = kodelet_config::kodelet_dir();
    match backend {
        kodelet_config::StoreBackend::File => Ok(Arc::new(FileConversationStore::new(
            base.join("conversations"),
        ))),
        kodelet_config::StoreBackend::Sqlite => Ok(Arc::new(SqliteConversationStore::open(
            base.join("conversations.db"),
        )?)),
    }
}

#[cfg(test)]
pub(crate) fn conversations_dir_for_test(dir: &std::path::Path) -> std::path::PathBuf {
    dir.join("conversations")
}
