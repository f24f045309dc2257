// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{ConversationRecord, ConversationStore, ConversationSummary, QueryOptions, StoreError};

/// SQLite backend: one row per conversation, full record as JSON plus
/// indexed listing columns.  A save is one transaction, so readers on
/// other connections never observe a partial row.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&path)?;
        Self::init(&conn)?;
        debug!(path = %path.display(), "opened sqlite conversation store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                provider    TEXT NOT NULL,
                model       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                summary     TEXT NOT NULL DEFAULT '',
                record      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_updated
                ON conversations(updated_at);
            CREATE INDEX IF NOT EXISTS idx_conversations_provider
                ON conversations(provider);",
        )?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute(
            "INSERT INTO conversations (id, provider, model, created_at, updated_at, summary, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                provider = excluded.provider,
                model = excluded.model,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                summary = excluded.summary,
                record = excluded.record",
            params![
                record.id,
                record.provider,
                record.model,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.summary,
                json,
            ],
        )?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn query(&self, options: &QueryOptions) -> Result<Vec<ConversationSummary>, StoreError> {
        // Load candidate records and evaluate the shared in-memory filter
        // so both backends agree exactly on matching and ordering.  The
        // provider filter is pushed down to keep the scan small.
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = match &options.provider {
            Some(_) => conn.prepare("SELECT record FROM conversations WHERE provider = ?1")?,
            None => conn.prepare("SELECT record FROM conversations")?,
        };
        let rows: Vec<String> = match &options.provider {
            Some(p) => stmt
                .query_map(params![p], |row| row.get::<_, String>(0))?
                .filter_map(Result::ok)
                .collect(),
            None => stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(Result::ok)
                .collect(),
        };
        let records: Vec<ConversationRecord> = rows
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        Ok(crate::query::apply_query(records, options))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kodelet_model::Message;

    fn record(provider: &str, summary: &str) -> ConversationRecord {
        let mut r = ConversationRecord::new(provider, "model-x");
        r.summary = summary.into();
        r.messages.push(Message::user("hello"));
        r
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let rec = record("anthropic", "first");
        store.save(&rec).await.unwrap();
        assert_eq!(store.load(&rec.id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let mut rec = record("anthropic", "v1");
        store.save(&rec).await.unwrap();
        rec.summary = "v2".into();
        rec.touch();
        store.save(&rec).await.unwrap();
        let rows = store.query(&QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.load(&rec.id).await.unwrap().summary, "v2");
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        assert!(matches!(
            store.load("ghost").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let rec = record("anthropic", "x");
        store.save(&rec).await.unwrap();
        store.delete(&rec.id).await.unwrap();
        store.delete(&rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn provider_filter_is_pushed_down() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        store.save(&record("anthropic", "a")).await.unwrap();
        store.save(&record("google", "g")).await.unwrap();
        let rows = store
            .query(&QueryOptions {
                provider: Some("google".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "google");
    }

    #[tokio::test]
    async fn file_backed_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv.db");
        let rec = record("anthropic", "durable");
        {
            let store = SqliteConversationStore::open(&path).unwrap();
            store.save(&rec).await.unwrap();
        }
        let store = SqliteConversationStore::open(&path).unwrap();
        assert_eq!(store.load(&rec.id).await.unwrap().summary, "durable");
    }

    #[tokio::test]
    async fn most_recent_id_matches_file_backend_semantics() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        let mut old = record("anthropic", "old");
        old.updated_at = chrono::Utc::now() - chrono::Duration::hours(1);
        store.save(&old).await.unwrap();
        let fresh = record("anthropic", "fresh");
        store.save(&fresh).await.unwrap();
        assert_eq!(store.most_recent_id().await.unwrap(), fresh.id);
    }
}
