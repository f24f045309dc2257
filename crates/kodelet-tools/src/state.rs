// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Shared per-thread tool state: the working directory, the file-access
/// ledger consulted by the edit tools, and the todo list.
///
/// One instance is shared by all tool executions of a thread; interior
/// mutability keeps `execute` signatures `&self`-based so independent tools
/// can run concurrently.
pub struct ToolState {
    working_dir: PathBuf,
    /// Last time each path was read through a tool.
    last_access: Mutex<HashMap<PathBuf, SystemTime>>,
    todos: Mutex<Vec<TodoItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TodoItem {
    pub content: String,
    pub status: String,
}

impl ToolState {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            last_access: Mutex::new(HashMap::new()),
            todos: Mutex::new(Vec::new()),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    /// Record that `path` was read now.
    pub fn record_access(&self, path: &Path) {
        self.last_access
            .lock()
            .expect("file-access ledger poisoned")
            .insert(path.to_path_buf(), SystemTime::now());
    }

    /// True when `path` was modified externally after its last recorded
    /// read, or has never been read.  Edit tools refuse to overwrite in
    /// either case.
    pub fn modified_since_read(&self, path: &Path) -> bool {
        let read_at = match self
            .last_access
            .lock()
            .expect("file-access ledger poisoned")
            .get(path)
            .copied()
        {
            Some(t) => t,
            None => return true,
        };
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime > read_at,
            // Vanished since the read; let the write-path error surface it.
            Err(_) => false,
        }
    }

    pub fn set_todos(&self, todos: Vec<TodoItem>) {
        *self.todos.lock().expect("todo list poisoned") = todos;
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.lock().expect("todo list poisoned").clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_keeps_absolute_paths() {
        let state = ToolState::new("/work");
        assert_eq!(state.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let state = ToolState::new("/work");
        assert_eq!(state.resolve("src/main.rs"), PathBuf::from("/work/src/main.rs"));
    }

    #[test]
    fn unread_file_counts_as_modified() {
        let state = ToolState::new("/work");
        assert!(state.modified_since_read(Path::new("/tmp/never-read.txt")));
    }

    #[test]
    fn freshly_read_file_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let state = ToolState::new(dir.path());
        state.record_access(&path);
        assert!(!state.modified_since_read(&path));
    }

    #[test]
    fn external_write_after_read_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "v1").unwrap();
        let state = ToolState::new(dir.path());
        state.record_access(&path);
        // Make sure the mtime moves past the recorded instant.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, "v2").unwrap();
        assert!(state.modified_since_read(&path));
    }

    #[test]
    fn todos_round_trip() {
        let state = ToolState::new("/work");
        let items = vec![TodoItem {
            content: "write tests".into(),
            status: "pending".into(),
        }];
        state.set_todos(items.clone());
        assert_eq!(state.todos(), items);
    }
}
