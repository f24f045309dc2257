// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{require_str, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Cap on reported paths.
const MAX_RESULTS: usize = 500;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern (e.g. \"**/*.rs\", \"src/*.toml\").\n\
         Matches are relative to the working directory unless the pattern is\n\
         absolute. Results are sorted by modification time, newest first,\n\
         capped at 500 paths."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern: * matches within a segment, ** crosses directories"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let pattern = require_str(args, "pattern")?;
        glob_to_regex(pattern).map_err(|e| format!("invalid glob: {e}"))?;
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let pattern = call.args["pattern"].as_str().unwrap_or_default();
        let root = state.working_dir().to_path_buf();
        let re = match glob_to_regex(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid glob: {e}")),
        };

        let call_id = call.id.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut hits: Vec<(std::path::PathBuf, std::time::SystemTime)> = Vec::new();
            for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| !is_skipped_dir(e))
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                if re.is_match(&rel) {
                    let mtime = entry
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                    hits.push((entry.path().to_path_buf(), mtime));
                }
            }
            hits.sort_by(|a, b| b.1.cmp(&a.1));
            hits.truncate(MAX_RESULTS);
            hits
        })
        .await;

        let hits = match result {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call_id, format!("glob task failed: {e}")),
        };

        let paths: Vec<String> = hits
            .iter()
            .map(|(p, _)| p.to_string_lossy().into_owned())
            .collect();
        let text = if paths.is_empty() {
            "no files matched".to_string()
        } else {
            paths.join("\n")
        };

        ToolOutput::ok_with_payload(&call_id, text, json!({ "paths": paths }))
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == ".git" || name == "target" || name == "node_modules"
}

/// Translate a glob pattern into an anchored regex.
/// `**/` crosses directory boundaries, `*` stays within a segment, `?`
/// matches one character.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Consume a following '/' so "**/*.rs" also matches
                    // files at the top level.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    Regex::new(&out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
