// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Default number of lines returned when the caller does not specify a
/// limit.  Kept small to avoid flooding the model context on the first
/// read; the agent paginates with offset + limit for more.
const DEFAULT_LINE_LIMIT: usize = 500;

/// Hard byte ceiling applied in addition to the line limit.
const MAX_BYTES: usize = 80_000;

pub struct ReadFileTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file. Default: 500 lines / 80 KB — whichever comes first.\n\
         Lines are formatted as {n}:content (1-indexed). For edit_file old_str strip\n\
         the line-number prefix. When more lines exist, a pagination notice shows the\n\
         next offset. Use grep to find the relevant region first, then read only those\n\
         lines with offset+limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 500)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        require_str(args, "path")?;
        if let Some(offset) = args.get("offset") {
            if offset.as_u64().is_none() {
                return Err("'offset' must be a non-negative integer".into());
            }
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;
        let resolved = state.resolve(path);
        debug!(path = %resolved.display(), offset, limit, "read_file tool");

        let raw = match tokio::fs::read_to_string(&resolved).await {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        state.record_access(&resolved);

        let lines: Vec<&str> = raw.lines().collect();
        let total = lines.len();
        let start = offset.saturating_sub(1).min(total);
        let mut out = String::new();
        let mut shown = 0usize;
        for (i, line) in lines.iter().enumerate().skip(start).take(limit) {
            if out.len() + line.len() > MAX_BYTES {
                break;
            }
            out.push_str(&format!("{}:{}\n", i + 1, line));
            shown += 1;
        }
        if start + shown < total {
            out.push_str(&format!(
                "[{} more lines; continue with offset={}]\n",
                total - start - shown,
                start + shown + 1
            ));
        }

        ToolOutput::ok_with_payload(
            &call.id,
            out,
            json!({
                "path": resolved.to_string_lossy(),
                "total_lines": total,
                "offset": offset,
                "shown": shown,
            }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "read_file".into(),
            args,
        }
    }

    fn tool() -> ReadFileTool {
        ReadFileTool { timeout_secs: 30 }
    }

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "alpha\nbeta\n").unwrap();
        let state = ToolState::new(dir.path());
        let out = tool()
            .execute(&state, &call(json!({"path": "a.txt"})))
            .await;
        assert!(!out.is_error);
        assert!(out.assistant.contains("1:alpha"));
        assert!(out.assistant.contains("2:beta"));
    }

    #[tokio::test]
    async fn read_records_file_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let state = ToolState::new(dir.path());
        tool().execute(&state, &call(json!({"path": "a.txt"}))).await;
        assert!(!state.modified_since_read(&path));
    }

    #[tokio::test]
    async fn offset_and_limit_paginate() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let state = ToolState::new(dir.path());
        let out = tool()
            .execute(
                &state,
                &call(json!({"path": "a.txt", "offset": 3, "limit": 2})),
            )
            .await;
        assert!(out.assistant.contains("3:line3"));
        assert!(out.assistant.contains("4:line4"));
        assert!(!out.assistant.contains("5:line5"));
        assert!(out.assistant.contains("offset=5"));
    }

    #[tokio::test]
    async fn missing_file_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let state = ToolState::new(dir.path());
        let out = tool()
            .execute(&state, &call(json!({"path": "nope.txt"})))
            .await;
        assert!(out.is_error);
    }

    #[test]
    fn validate_requires_path() {
        assert!(tool().validate(&json!({})).is_err());
        assert!(tool().validate(&json!({"path": "a"})).is_ok());
    }
}
