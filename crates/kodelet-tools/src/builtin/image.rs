// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::tool::{require_str, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Ceiling on raw image bytes; provider APIs reject larger payloads anyway.
const MAX_IMAGE_BYTES: usize = 5_000_000;

/// Loads a local image as a base64 data URL so the thread can attach it to
/// the next user turn for vision-capable models.
pub struct ImageTool;

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[async_trait]
impl Tool for ImageTool {
    fn name(&self) -> &str {
        "image"
    }

    fn description(&self) -> &str {
        "Load a local image file (png/jpg/gif/webp) and return it as a base64\n\
         data URL for vision input. Maximum size 5 MB."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the image file"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let path = require_str(args, "path")?;
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if mime_for_extension(ext).is_none() {
            return Err(format!("unsupported image extension {ext:?}"));
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let resolved = state.resolve(path);
        let ext = resolved
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let mime = match mime_for_extension(&ext) {
            Some(m) => m,
            None => return ToolOutput::err(&call.id, format!("unsupported image extension {ext:?}")),
        };

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        if bytes.len() > MAX_IMAGE_BYTES {
            return ToolOutput::err(
                &call.id,
                format!("image is {} bytes; maximum is {MAX_IMAGE_BYTES}", bytes.len()),
            );
        }

        let data_url = format!("data:{mime};base64,{}", STANDARD.encode(&bytes));
        ToolOutput::ok_with_payload(
            &call.id,
            format!("loaded image {} ({} bytes)", resolved.display(), bytes.len()),
            json!({ "image_url": data_url, "bytes": bytes.len() }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
