// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::oauth::{HttpRefresher, TokenRefresher};
use crate::record::{CredentialFile, CredentialRecord};

/// A credential whose expiry is within this many seconds is refreshed
/// before its bearer is handed out.
pub const REFRESH_WINDOW_SECS: u64 = 600;

/// Multi-account credential store for the subscription provider.
///
/// All mutations go through an in-process mutex so that read-modify-write
/// cycles are serialized: two tasks asking for the same expiring alias
/// perform exactly one refresh request between them.  The on-disk update is
/// a temp-file write followed by a rename, so concurrent readers observe
/// either the old or the new file, never a partial one.
pub struct CredentialStore {
    path: PathBuf,
    refresher: Arc<dyn TokenRefresher>,
    lock: Mutex<()>,
}

impl CredentialStore {
    /// Store backed by `~/.kodelet/anthropic-subscription.json` and the
    /// provider's real token endpoint.
    pub fn open_default() -> Self {
        Self::new(
            kodelet_config::kodelet_dir().join("anthropic-subscription.json"),
            Arc::new(HttpRefresher::default()),
        )
    }

    pub fn new(path: PathBuf, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            path,
            refresher,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All accounts ordered by alias, with the default flagged.
    pub fn list(&self) -> Result<Vec<(String, CredentialRecord, bool)>, AuthError> {
        let file = self.read_file()?;
        Ok(file
            .accounts
            .iter()
            .map(|(alias, rec)| {
                let is_default = file.default.as_deref() == Some(alias.as_str());
                (alias.clone(), rec.clone(), is_default)
            })
            .collect())
    }

    /// Add a credential, assigning an alias when none is supplied (derived
    /// from the email, suffixed `-2`, `-3`, … on collision).  The first
    /// account added becomes the default.  Returns the assigned alias.
    pub async fn add(
        &self,
        alias: Option<String>,
        record: CredentialRecord,
    ) -> Result<String, AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        let alias = match alias {
            Some(a) => {
                if file.accounts.contains_key(&a) {
                    return Err(AuthError::Conflict(a));
                }
                a
            }
            None => file.free_alias(&record.email),
        };
        file.accounts.insert(alias.clone(), record);
        if file.default.is_none() {
            file.default = Some(alias.clone());
        }
        self.write_file(&file)?;
        Ok(alias)
    }

    /// Remove an account.  When the default is removed another account is
    /// promoted deterministically: the lexically-first remaining alias.
    pub async fn remove(&self, alias: &str) -> Result<(), AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        if file.accounts.remove(alias).is_none() {
            return Err(AuthError::NotFound(alias.to_string()));
        }
        if file.default.as_deref() == Some(alias) {
            // BTreeMap iterates in lexical order.
            file.default = file.accounts.keys().next().cloned();
        }
        self.write_file(&file)
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        if file.accounts.contains_key(new) {
            return Err(AuthError::Conflict(new.to_string()));
        }
        let record = file
            .accounts
            .remove(old)
            .ok_or_else(|| AuthError::NotFound(old.to_string()))?;
        file.accounts.insert(new.to_string(), record);
        if file.default.as_deref() == Some(old) {
            file.default = Some(new.to_string());
        }
        self.write_file(&file)
    }

    pub async fn set_default(&self, alias: &str) -> Result<(), AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        if !file.accounts.contains_key(alias) {
            return Err(AuthError::NotFound(alias.to_string()));
        }
        file.default = Some(alias.to_string());
        self.write_file(&file)
    }

    /// Resolve an alias (or the default when `None`) to a valid bearer
    /// token and the account's email.
    ///
    /// When the credential expires within [`REFRESH_WINDOW_SECS`], it is
    /// refreshed synchronously through the token endpoint and the rotated
    /// record written back before the bearer is returned.  Holding the
    /// store lock across the refresh guarantees that concurrent callers for
    /// the same alias serialize and the second one sees the fresh token
    /// instead of issuing a second refresh.
    pub async fn get_valid_token(
        &self,
        alias: Option<&str>,
    ) -> Result<(String, String), AuthError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        let alias = match alias.filter(|a| !a.is_empty()) {
            Some(a) => a.to_string(),
            None => file.default.clone().ok_or(AuthError::NoDefault)?,
        };
        let record = file
            .accounts
            .get(&alias)
            .ok_or_else(|| AuthError::NotFound(alias.clone()))?
            .clone();

        if record.expires_at.saturating_sub(now_unix()) > REFRESH_WINDOW_SECS {
            return Ok((record.access_token, record.email));
        }

        debug!(alias = %alias, expires_at = record.expires_at, "refreshing subscription token");
        let token = self
            .refresher
            .refresh(&alias, &record.refresh_token)
            .await?;

        let mut updated = record.clone();
        updated.access_token = token.access_token.clone();
        if let Some(rt) = token.refresh_token {
            updated.refresh_token = rt;
        }
        // expires_at is monotonic across refreshes: never move it backwards
        // even if the endpoint reports a shorter lifetime than remains.
        let new_expiry = now_unix() + token.expires_in;
        if new_expiry > updated.expires_at {
            updated.expires_at = new_expiry;
        } else {
            warn!(
                alias = %alias,
                old = updated.expires_at,
                new = new_expiry,
                "refresh returned non-increasing expiry; keeping the later one"
            );
        }
        let email = updated.email.clone();
        let bearer = updated.access_token.clone();
        file.accounts.insert(alias, updated);
        self.write_file(&file)?;
        Ok((bearer, email))
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    fn read_file(&self) -> Result<CredentialFile, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(CredentialFile::parse(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CredentialFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic replacement: write to a temp file in the same directory, then
    /// rename over the target.  Also the point where a legacy single-account
    /// file is transparently upgraded to the multi-account schema.
    fn write_file(&self, file: &CredentialFile) -> Result<(), AuthError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::oauth::TokenResponse;

    /// Counts refresh calls and returns a canned rotated token.
    struct FakeRefresher {
        calls: AtomicUsize,
        expires_in: u64,
    }

    impl FakeRefresher {
        fn new(expires_in: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                expires_in,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(
            &self,
            _alias: &str,
            _refresh_token: &str,
        ) -> Result<TokenResponse, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenResponse {
                access_token: "rotated".into(),
                refresh_token: Some("rt-2".into()),
                expires_in: self.expires_in,
                scope: None,
                account: None,
                organization: None,
            })
        }
    }

    fn record(email: &str, expires_at: u64) -> CredentialRecord {
        CredentialRecord {
            email: email.into(),
            access_token: "at-original".into(),
            refresh_token: "rt-1".into(),
            expires_at,
            scope: "user:inference".into(),
            account_uuid: None,
            organization_uuid: None,
        }
    }

    fn store_at(dir: &Path, refresher: Arc<dyn TokenRefresher>) -> CredentialStore {
        CredentialStore::new(dir.join("subscription.json"), refresher)
    }

    fn far_future() -> u64 {
        now_unix() + 86_400
    }

    #[tokio::test]
    async fn first_account_becomes_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        let alias = store.add(None, record("a@x.com", far_future())).await.unwrap();
        assert_eq!(alias, "a");
        let list = store.list().unwrap();
        assert!(list[0].2, "first account must be flagged default");
    }

    #[tokio::test]
    async fn add_derives_suffixed_alias_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        store.add(None, record("a@x.com", far_future())).await.unwrap();
        let second = store.add(None, record("a@y.com", far_future())).await.unwrap();
        assert_eq!(second, "a-2");
    }

    #[tokio::test]
    async fn add_explicit_alias_conflict_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        store
            .add(Some("work".into()), record("a@x.com", far_future()))
            .await
            .unwrap();
        let err = store
            .add(Some("work".into()), record("b@x.com", far_future()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn remove_default_promotes_lexically_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        store
            .add(Some("zeta".into()), record("z@x.com", far_future()))
            .await
            .unwrap();
        store
            .add(Some("alpha".into()), record("a@x.com", far_future()))
            .await
            .unwrap();
        store
            .add(Some("mid".into()), record("m@x.com", far_future()))
            .await
            .unwrap();
        // zeta was added first, so it is the default.
        store.remove("zeta").await.unwrap();
        let list = store.list().unwrap();
        let default: Vec<_> = list.iter().filter(|(_, _, d)| *d).collect();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].0, "alpha");
    }

    #[tokio::test]
    async fn remove_unknown_alias_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        let err = store.remove("ghost").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_moves_record_and_default_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        store
            .add(Some("old".into()), record("a@x.com", far_future()))
            .await
            .unwrap();
        store.rename("old", "new").await.unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0, "new");
        assert!(list[0].2, "default pointer must follow the rename");
        assert_eq!(list[0].1.email, "a@x.com");
    }

    #[tokio::test]
    async fn rename_to_existing_alias_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        store
            .add(Some("a".into()), record("a@x.com", far_future()))
            .await
            .unwrap();
        store
            .add(Some("b".into()), record("b@x.com", far_future()))
            .await
            .unwrap();
        assert!(matches!(
            store.rename("a", "b").await.unwrap_err(),
            AuthError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn get_valid_token_without_accounts_is_no_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FakeRefresher::new(3600)));
        assert!(matches!(
            store.get_valid_token(None).await.unwrap_err(),
            AuthError::NoDefault
        ));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = store_at(dir.path(), refresher.clone());
        store.add(None, record("a@x.com", far_future())).await.unwrap();
        let (bearer, email) = store.get_valid_token(None).await.unwrap();
        assert_eq!(bearer, "at-original");
        assert_eq!(email, "a@x.com");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = Arc::new(FakeRefresher::new(28_800));
        let store = store_at(dir.path(), refresher.clone());
        // Inside the 10-minute refresh window.
        store
            .add(None, record("a@x.com", now_unix() + 300))
            .await
            .unwrap();
        let (bearer, _) = store.get_valid_token(Some("a")).await.unwrap();
        assert_eq!(bearer, "rotated");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // Disk record was rotated: subsequent calls make no further requests.
        let (bearer2, _) = store.get_valid_token(Some("a")).await.unwrap();
        assert_eq!(bearer2, "rotated");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let list = store.list().unwrap();
        assert_eq!(list[0].1.refresh_token, "rt-2");
    }

    #[tokio::test]
    async fn concurrent_callers_issue_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = Arc::new(FakeRefresher::new(28_800));
        let store = Arc::new(store_at(dir.path(), refresher.clone()));
        store
            .add(None, record("a@x.com", now_unix() + 60))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let s = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                s.get_valid_token(Some("a")).await.unwrap()
            }));
        }
        for t in tasks {
            let (bearer, _) = t.await.unwrap();
            assert_eq!(bearer, "rotated");
        }
        assert_eq!(
            refresher.calls.load(Ordering::SeqCst),
            1,
            "exactly one refresh request must be issued"
        );
    }

    #[tokio::test]
    async fn expiry_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        // Refresh reports a 10-second lifetime, shorter than what remains.
        let refresher = Arc::new(FakeRefresher::new(10));
        let store = store_at(dir.path(), refresher);
        let original_expiry = now_unix() + 400; // inside the window
        store.add(None, record("a@x.com", original_expiry)).await.unwrap();
        store.get_valid_token(Some("a")).await.unwrap();
        let list = store.list().unwrap();
        assert!(list[0].1.expires_at >= original_expiry);
    }

    #[tokio::test]
    async fn legacy_single_account_file_is_upgraded_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscription.json");
        std::fs::write(
            &path,
            serde_json::to_string(&record("legacy@x.com", far_future())).unwrap(),
        )
        .unwrap();
        let store = CredentialStore::new(path.clone(), Arc::new(FakeRefresher::new(3600)));
        // Readable through the multi-account API.
        let list = store.list().unwrap();
        assert_eq!(list[0].0, "legacy");
        // First mutation rewrites the multi schema.
        store.add(None, record("b@x.com", far_future())).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(v.get("accounts").is_some(), "upgraded file must be multi-account");
        assert_eq!(v["default"], "legacy");
    }
}
