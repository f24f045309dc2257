// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{require_str, Capability, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Combined stdout + stderr ceiling before clipping kicks in.
const MAX_CAPTURE_BYTES: usize = 24_000;

/// Lines kept from the start of clipped output.
const LEAD_LINES: usize = 80;

/// Lines kept from the end of clipped output.  The trail gets the larger
/// share: compiler diagnostics and test failures land last.
const TRAIL_LINES: usize = 120;

/// Built-in tool that runs a shell command, with an optional per-command
/// allow-list matched against the first word.
pub struct BashTool {
    pub timeout_secs: u64,
    /// Commands the model may run; empty allows any command.
    pub allow: Vec<String>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         Output over ~24 KB is clipped: the first 80 and last 120 lines survive,\n\
         with a <<clipped>> marker where the middle was dropped.\n\
         Prefer non-interactive commands; avoid commands that require a TTY.\n\
         Do NOT use bash for file operations:\n\
         - Read files  → read_file (not cat / head / tail)\n\
         - Search text → grep tool (not grep / rg)\n\
         - Find files  → glob tool (not find / ls -R)\n\
         - Edit files  → edit_file (not sed / awk)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn capability(&self) -> Capability {
        Capability::LongRunning
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let command = require_str(args, "command")?;
        if command.trim().is_empty() {
            return Err("'command' must not be empty".into());
        }
        if !self.allow.is_empty() {
            let first_word = command.trim().split_whitespace().next().unwrap_or("");
            if !self.allow.iter().any(|a| a == first_word) {
                return Err(format!(
                    "command {first_word:?} is not in the allow-list ({})",
                    self.allow.join(", ")
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let command = call.args["command"].as_str().unwrap_or_default().to_string();
        debug!(cmd = %command, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(state.working_dir());
        // `stdin(null)` keeps subprocesses away from the controlling
        // terminal; `kill_on_drop` guarantees the child receives SIGKILL
        // when the execution future is dropped on timeout or cancellation.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // setsid() detaches the child into its own process group so a
        // cancelled command cannot keep writing to the caller's terminal.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let output = match cmd.output().await {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut content = String::new();
        if !stdout.is_empty() {
            content.push_str(&clip_output(&stdout));
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&clip_output(&stderr));
        }

        let code = output.status.code().unwrap_or(-1);
        let payload = json!({ "command": command, "exit_code": code });
        if code == 0 {
            if content.is_empty() {
                content = "[exit 0]".into();
            }
            ToolOutput::ok_with_payload(&call.id, content, payload)
        } else if code == 1 {
            // Exit code 1 is the Unix convention for "no matches" (grep) and
            // "condition false" (test); flagging it as an error teaches the
            // model that the command itself failed, which it did not.
            let out = if content.is_empty() {
                "[exit 1]".to_string()
            } else {
                format!("[exit 1]\n{content}")
            };
            ToolOutput::ok_with_payload(&call.id, out, payload)
        } else {
            let mut out = ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"));
            out.payload = payload;
            out
        }
    }
}

/// Clip oversized command output, keeping a lead and a trail window.
///
/// Two regimes, decided by how the bytes are distributed:
/// - many lines → keep [`LEAD_LINES`] from the start and [`TRAIL_LINES`]
///   from the end, counted in lines;
/// - a handful of very long lines (minified JSON, progress bars) → fall
///   back to byte windows, a third of the budget up front and the rest at
///   the end, snapped to char boundaries so multibyte text never splits.
///
/// A `<<clipped: …>>` marker always shows what was dropped.
pub(crate) fn clip_output(raw: &str) -> String {
    if raw.len() <= MAX_CAPTURE_BYTES {
        return raw.to_string();
    }

    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() > LEAD_LINES + TRAIL_LINES {
        let dropped = lines.len() - LEAD_LINES - TRAIL_LINES;
        let mut out = String::with_capacity(MAX_CAPTURE_BYTES + 64);
        out.push_str(&lines[..LEAD_LINES].join("\n"));
        out.push_str(&format!("\n<<clipped: {dropped} middle lines dropped>>\n"));
        out.push_str(&lines[lines.len() - TRAIL_LINES..].join("\n"));
        return out;
    }

    let lead_budget = MAX_CAPTURE_BYTES / 3;
    let lead_end = snap_back(raw, lead_budget);
    let trail_start = snap_forward(raw, raw.len() - (MAX_CAPTURE_BYTES - lead_budget));
    let dropped = trail_start - lead_end;
    format!(
        "{}\n<<clipped: {dropped} bytes dropped>>\n{}",
        &raw[..lead_end],
        &raw[trail_start..]
    )
}

/// Largest char boundary at or below `at`.
fn snap_back(s: &str, at: usize) -> usize {
    let mut i = at.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary at or above `at`.
fn snap_forward(s: &str, at: usize) -> usize {
    let mut i = at.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
