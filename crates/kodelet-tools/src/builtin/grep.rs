// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{require_str, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Cap on reported matches; leading matches are the most relevant.
const MAX_MATCHES: usize = 200;

/// Files larger than this are skipped — almost certainly build artifacts
/// or data, and scanning them floods the match list.
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matches as\n\
         path:line:content, capped at 200 matches — use a more specific pattern\n\
         or the 'path' parameter to narrow the search. Hidden directories,\n\
         .git, and target/ are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search (default: working dir)"
                },
                "include": {
                    "type": "string",
                    "description": "Only search files whose name contains this substring or extension (e.g. '.rs')"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let pattern = require_str(args, "pattern")?;
        Regex::new(pattern).map_err(|e| format!("invalid regex: {e}"))?;
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let pattern = call.args["pattern"].as_str().unwrap_or_default();
        let root = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| state.resolve(p))
            .unwrap_or_else(|| state.working_dir().to_path_buf());
        let include = call
            .args
            .get("include")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let re = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid regex: {e}")),
        };
        debug!(pattern = %pattern, root = %root.display(), "grep tool");

        // File walking and scanning is synchronous; hop to a blocking thread
        // so parallel tools keep the executor responsive.
        let call_id = call.id.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<(String, usize, String)> = Vec::new();
            let mut scanned = 0usize;
            let mut truncated = false;

            'walk: for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| !is_skipped_dir(e))
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                if let Some(filter) = &include {
                    let name = entry.file_name().to_string_lossy();
                    if !name.contains(filter.as_str()) {
                        continue;
                    }
                }
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                let content = match std::fs::read_to_string(entry.path()) {
                    Ok(c) => c,
                    Err(_) => continue, // binary or unreadable
                };
                scanned += 1;
                for (i, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        if matches.len() >= MAX_MATCHES {
                            truncated = true;
                            break 'walk;
                        }
                        matches.push((
                            entry.path().to_string_lossy().into_owned(),
                            i + 1,
                            line.trim_end().to_string(),
                        ));
                    }
                }
            }
            (matches, scanned, truncated)
        })
        .await;

        let (matches, scanned, truncated) = match result {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call_id, format!("grep task failed: {e}")),
        };

        let mut text = matches
            .iter()
            .map(|(path, line, content)| format!("{path}:{line}:{content}"))
            .collect::<Vec<_>>()
            .join("\n");
        if matches.is_empty() {
            text = format!("no matches in {scanned} files");
        } else if truncated {
            text.push_str("\n[match cap reached; use a more specific pattern]");
        }

        ToolOutput::ok_with_payload(
            &call_id,
            text,
            json!({
                "match_count": matches.len(),
                "files_scanned": scanned,
                "truncated": truncated,
            }),
        )
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == ".git" || name == "target" || name == "node_modules" || name.starts_with('.')
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
