// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The built-in system prompt.

use std::path::Path;

const BASE_PROMPT: &str = "\
You are Kodelet, an agentic coding assistant operating in a local workspace.

You accomplish software-engineering tasks by calling the available tools: \
read and edit files, search the codebase, run shell commands, and fetch web \
pages. Work iteratively: inspect before you modify, make focused changes, \
and verify the result. Prefer the dedicated file tools over shell commands \
for file operations.

When a task needs several steps, maintain a todo list and keep it current. \
Report what you changed and why when you finish; if something cannot be \
done, say so plainly instead of guessing.";

/// Assemble the system prompt for a thread.
///
/// A custom override replaces the built-in text entirely; the working
/// directory note is always appended so the model knows where it is.
pub fn system_prompt(working_dir: &Path, custom: Option<&str>) -> String {
    let base = custom.unwrap_or(BASE_PROMPT);
    format!(
        "{base}\n\nWorking directory: {}",
        working_dir.display()
    )
}

/// Prompt for the context compaction call.
pub const COMPACTION_PROMPT: &str = "\
You are compacting an agent conversation to free context space. Summarise \
the prior conversation below into a dense checkpoint that preserves: the \
active task, key decisions and their rationale, every file read or \
modified, constraints and user preferences, and unfinished work. Preserve \
file paths, function names, and error messages verbatim where they matter. \
The summary will replace the original history.";

/// Synthetic user message injected when the turn cap is reached.
pub const TURN_LIMIT_PROMPT: &str = "\
Turn limit reached — do not call any more tools. Summarise what has been \
completed, what remains, and how to continue, then stop.";

// ─── Unit tests ──────────────────────────────────────────────────────────────
