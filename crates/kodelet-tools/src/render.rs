// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Human-readable rendering of tool results for the console.
//!
//! Dispatches on tool name; the assistant-facing string is already compact,
//! so most renderers summarize rather than repeat it.

use crate::ToolOutput;

/// Render a tool result for terminal display.
pub fn render_human(tool_name: &str, output: &ToolOutput) -> String {
    if output.is_error {
        return format!("✗ {tool_name}: {}", first_line(&output.assistant));
    }
    match tool_name {
        "read_file" => {
            let shown = output.payload["shown"].as_u64().unwrap_or(0);
            let total = output.payload["total_lines"].as_u64().unwrap_or(0);
            let path = output.payload["path"].as_str().unwrap_or("?");
            format!("read {path} ({shown}/{total} lines)")
        }
        "write_file" | "edit_file" => first_line(&output.assistant).to_string(),
        "grep" => {
            let count = output.payload["match_count"].as_u64().unwrap_or(0);
            format!("grep: {count} match(es)")
        }
        "glob" => {
            let count = output.payload["paths"]
                .as_array()
                .map(|a| a.len())
                .unwrap_or(0);
            format!("glob: {count} file(s)")
        }
        "bash" => {
            let code = output.payload["exit_code"].as_i64().unwrap_or(0);
            format!("bash [exit {code}]: {}", first_line(&output.assistant))
        }
        "web_fetch" => {
            let url = output.payload["url"].as_str().unwrap_or("?");
            let status = output.payload["status"].as_u64().unwrap_or(0);
            format!("fetched {url} (HTTP {status})")
        }
        "todo" | "think" => first_line(&output.assistant).to_string(),
        name if name.starts_with("mcp_") => {
            format!("{name}: {}", first_line(&output.assistant))
        }
        _ => first_line(&output.assistant).to_string(),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
