// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Capability, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Byte cap on the rendered page text handed to the model.
const MAX_TEXT_BYTES: usize = 40_000;

/// Render width for the HTML-to-text conversion.
const RENDER_COLUMNS: usize = 100;

pub struct WebFetchTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return its content. HTML is rendered to\n\
         plain text; other content types are returned verbatim. Output is capped\n\
         at ~40 KB."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http:// or https:// URL to fetch"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn capability(&self) -> Capability {
        Capability::Network
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let url = require_str(args, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("'url' must start with http:// or https://".into());
        }
        Ok(())
    }

    async fn execute(&self, _state: &ToolState, call: &ToolCall) -> ToolOutput {
        let url = call.args["url"].as_str().unwrap_or_default();
        debug!(url = %url, "web_fetch tool");

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent("kodelet")
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("client error: {e}")),
        };

        let resp = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch error: {e}")),
        };

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("body error: {e}")),
        };

        if !status.is_success() {
            return ToolOutput::err(
                &call.id,
                format!("HTTP {status} fetching {url}: {}", truncate(&body, 500)),
            );
        }

        let text = if content_type.contains("text/html") {
            html2text::from_read(body.as_bytes(), RENDER_COLUMNS)
        } else {
            body
        };
        let text = truncate(&text, MAX_TEXT_BYTES);

        ToolOutput::ok_with_payload(
            &call.id,
            text,
            json!({
                "url": url,
                "status": status.as_u16(),
                "content_type": content_type,
            }),
        )
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .take_while(|(i, _)| *i < max)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(max);
    format!("{}\n[... truncated at {max} bytes ...]", &s[..cut])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
