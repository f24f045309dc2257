// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory query evaluation shared by backends that load whole records.

use crate::{ConversationRecord, ConversationSummary, QueryOptions, SortKey};

/// Filter, sort, and paginate records per the query options.
pub(crate) fn apply_query(
    records: Vec<ConversationRecord>,
    options: &QueryOptions,
) -> Vec<ConversationSummary> {
    let mut rows: Vec<ConversationSummary> = records
        .into_iter()
        .filter(|r| matches(r, options))
        .map(|r| r.to_summary())
        .collect();

    rows.sort_by(|a, b| {
        let ord = match options.sort {
            SortKey::Updated => a.updated_at.cmp(&b.updated_at),
            SortKey::Created => a.created_at.cmp(&b.created_at),
        };
        if options.ascending {
            ord
        } else {
            ord.reverse()
        }
    });

    rows.into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}

fn matches(record: &ConversationRecord, options: &QueryOptions) -> bool {
    if let Some(provider) = &options.provider {
        if &record.provider != provider {
            return false;
        }
    }
    if let Some(start) = options.start {
        if record.updated_at < start {
            return false;
        }
    }
    if let Some(end) = options.end {
        if record.created_at > end {
            return false;
        }
    }
    if let Some(needle) = &options.search {
        let needle = needle.to_lowercase();
        let in_summary = record.summary.to_lowercase().contains(&needle);
        let in_first = record
            .first_user_text()
            .map(|t| t.to_lowercase().contains(&needle))
            .unwrap_or(false);
        if !in_summary && !in_first {
            return false;
        }
    }
    true
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
