// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Polling-based live tail of a conversation.
//!
//! A follower loads the record on an interval, diffs against the count it
//! last emitted, and hands new messages to the caller.  Polling with
//! sequence numbers keeps every backend streamable with no pub/sub
//! machinery; message lists are append-only within a thread, so the index
//! is the high-water mark.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use kodelet_model::Message;

use crate::{ConversationStore, StoreError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct StreamOptions {
    /// Poll cadence.
    pub interval: Duration,
    /// Emit the existing backlog on the first poll; otherwise only
    /// messages appended after subscribing are emitted.
    pub include_history: bool,
    /// Cancelling this token ends the stream immediately.
    pub cancel: CancellationToken,
    /// Fired by the writer when it is done; the follower keeps polling
    /// for one final grace period (2× interval) to catch the last write.
    pub writer_done: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            include_history: false,
            cancel: CancellationToken::new(),
            writer_done: CancellationToken::new(),
        }
    }
}

/// Follow `id`, invoking `emit` with `(index, message)` for every new
/// message, in ascending index order.
///
/// Returns when cancelled or after the post-completion grace period.  A
/// record that does not exist yet is not an error — the follower keeps
/// polling until it appears (the writer may not have persisted the first
/// turn yet).
pub async fn stream_live_updates<F>(
    store: &dyn ConversationStore,
    id: &str,
    opts: StreamOptions,
    mut emit: F,
) -> Result<(), StoreError>
where
    F: FnMut(usize, &Message),
{
    let mut high_water: Option<usize> = None;
    let mut grace_polls_left: Option<u32> = None;

    loop {
        match store.load(id).await {
            Ok(record) => {
                let total = record.messages.len();
                let start = match high_water {
                    Some(n) => n,
                    // First successful poll decides the baseline.
                    None if opts.include_history => 0,
                    None => total,
                };
                if total > start {
                    for (i, msg) in record.messages.iter().enumerate().skip(start) {
                        emit(i, msg);
                    }
                }
                high_water = Some(total.max(start));
            }
            Err(StoreError::NotFound(_)) => {
                debug!(id, "conversation not persisted yet; continuing to poll");
            }
            Err(e) => return Err(e),
        }

        // After the writer signals completion, poll through a 2×-interval
        // grace window so the final save is not missed, then stop.
        if opts.writer_done.is_cancelled() && grace_polls_left.is_none() {
            grace_polls_left = Some(2);
        }
        if let Some(left) = grace_polls_left {
            if left == 0 {
                return Ok(());
            }
            grace_polls_left = Some(left - 1);
        }

        tokio::select! {
            _ = opts.cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(opts.interval) => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{ConversationRecord, FileConversationStore};
    use kodelet_model::Message;

    fn fast_opts() -> StreamOptions {
        StreamOptions {
            interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn seeded_store(messages: usize) -> (tempfile::TempDir, FileConversationStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path().join("conversations"));
        let mut rec = ConversationRecord::new("anthropic", "m");
        for i in 0..messages {
            rec.messages.push(Message::user(format!("m{i}")));
        }
        crate::ConversationStore::save(&store, &rec).await.unwrap();
        let id = rec.id.clone();
        (dir, store, id)
    }

    #[tokio::test]
    async fn include_history_emits_backlog_in_order() {
        let (_dir, store, id) = seeded_store(3).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let opts = StreamOptions {
            include_history: true,
            ..fast_opts()
        };
        opts.writer_done.cancel();
        let seen2 = Arc::clone(&seen);
        stream_live_updates(&store, &id, opts, move |i, m| {
            seen2.lock().unwrap().push((i, m.as_text().unwrap().to_string()));
        })
        .await
        .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(0, "m0".into()), (1, "m1".into()), (2, "m2".into())]
        );
    }

    #[tokio::test]
    async fn without_history_only_new_messages_emit() {
        let (_dir, store, id) = seeded_store(2).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let opts = fast_opts();
        let cancel = opts.cancel.clone();

        // Append a third message shortly after the stream subscribes.
        let store2 = FileConversationStore::new(store.dir().to_path_buf());
        let id2 = id.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let mut rec = crate::ConversationStore::load(&store2, &id2).await.unwrap();
            rec.messages.push(Message::assistant("late"));
            rec.touch();
            crate::ConversationStore::save(&store2, &rec).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            cancel.cancel();
        });

        let seen2 = Arc::clone(&seen);
        stream_live_updates(&store, &id, opts, move |i, m| {
            seen2.lock().unwrap().push((i, m.as_text().unwrap().to_string()));
        })
        .await
        .unwrap();
        writer.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(2, "late".into())], "only the appended message emits");
    }

    #[tokio::test]
    async fn cancellation_ends_stream_promptly() {
        let (_dir, store, id) = seeded_store(1).await;
        let opts = fast_opts();
        opts.cancel.cancel();
        let started = std::time::Instant::now();
        stream_live_updates(&store, &id, opts, |_, _| {}).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn missing_record_is_polled_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path().join("conversations"));
        let opts = fast_opts();
        let cancel = opts.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        // Must not return NotFound while waiting for the first save.
        stream_live_updates(&store, "not-yet", opts, |_, _| {})
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writer_done_triggers_grace_then_exit() {
        let (_dir, store, id) = seeded_store(1).await;
        let opts = StreamOptions {
            include_history: true,
            ..fast_opts()
        };
        opts.writer_done.cancel();
        let started = std::time::Instant::now();
        let mut count = 0usize;
        stream_live_updates(&store, &id, opts, |_, _| count += 1)
            .await
            .unwrap();
        assert_eq!(count, 1);
        // Two grace polls at 10ms — well under a second.
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
