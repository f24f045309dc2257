// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tracing::debug;

use crate::tool::{require_str, Capability, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Anchor-based file editing: `old_str` must occur exactly once in the
/// file and is replaced by `new_str`.
pub struct EditFileTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by unique-anchor replacement: old_str must appear exactly once\n\
         in the file and is replaced with new_str. Include enough surrounding lines\n\
         in old_str to make it unique. The file must have been read since its last\n\
         external modification."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        })
    }

    fn capability(&self) -> Capability {
        Capability::Mutating
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        require_str(args, "path")?;
        let old = require_str(args, "old_str")?;
        let new = require_str(args, "new_str")?;
        if old.is_empty() {
            return Err("'old_str' must not be empty".into());
        }
        if old == new {
            return Err("'old_str' and 'new_str' are identical".into());
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let old_str = call.args["old_str"].as_str().unwrap_or_default();
        let new_str = call.args["new_str"].as_str().unwrap_or_default();
        let resolved = state.resolve(path);
        debug!(path = %resolved.display(), "edit_file tool");

        if state.modified_since_read(&resolved) {
            return ToolOutput::err(
                &call.id,
                format!(
                    "refusing to edit {}: file was not read, or changed on disk since \
                     the last read. Read it first.",
                    resolved.display()
                ),
            );
        }

        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let occurrences = original.matches(old_str).count();
        if occurrences == 0 {
            return ToolOutput::err(
                &call.id,
                "old_str not found in file. Re-read the file; the anchor must match \
                 the current content byte-for-byte.",
            );
        }
        if occurrences > 1 {
            return ToolOutput::err(
                &call.id,
                format!(
                    "old_str occurs {occurrences} times; include more surrounding \
                     context to make the anchor unique."
                ),
            );
        }

        let updated = original.replacen(old_str, new_str, 1);
        if let Err(e) = tokio::fs::write(&resolved, &updated).await {
            return ToolOutput::err(&call.id, format!("write error: {e}"));
        }
        state.record_access(&resolved);

        // Compact change summary for the model and renderers.
        let diff = TextDiff::from_lines(&original, &updated);
        let (mut added, mut removed) = (0usize, 0usize);
        for change in diff.iter_all_changes() {
            match change.tag() {
                similar::ChangeTag::Insert => added += 1,
                similar::ChangeTag::Delete => removed += 1,
                similar::ChangeTag::Equal => {}
            }
        }

        ToolOutput::ok_with_payload(
            &call.id,
            format!(
                "edited {} (+{added} -{removed} lines)",
                resolved.display()
            ),
            json!({
                "path": resolved.to_string_lossy(),
                "lines_added": added,
                "lines_removed": removed,
            }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
