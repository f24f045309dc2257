// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Capability, Tool, ToolCall, ToolOutput};
use crate::ToolState;

pub struct WriteFileTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories are\n\
         created as needed. Overwriting an existing file requires reading it first;\n\
         a file modified externally since the last read is refused."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write"
                }
            },
            "required": ["path", "content"],
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
        require_str(args, "content")?;
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let content = call.args["content"].as_str().unwrap_or_default();
        let resolved = state.resolve(path);
        debug!(path = %resolved.display(), bytes = content.len(), "write_file tool");

        if resolved.exists() && state.modified_since_read(&resolved) {
            return ToolOutput::err(
                &call.id,
                format!(
                    "refusing to overwrite {}: file was not read, or changed on disk \
                     since the last read. Read it first.",
                    resolved.display()
                ),
            );
        }

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("mkdir error: {e}"));
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return ToolOutput::err(&call.id, format!("write error: {e}"));
        }
        state.record_access(&resolved);

        ToolOutput::ok_with_payload(
            &call.id,
            format!("wrote {} bytes to {}", content.len(), resolved.display()),
            json!({ "path": resolved.to_string_lossy(), "bytes": content.len() }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
