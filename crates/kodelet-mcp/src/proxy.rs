// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use kodelet_tools::{Capability, Tool, ToolCall, ToolOutput, ToolState};

use crate::client::{McpClient, McpToolInfo};

/// A registry entry proxying one remote MCP tool.
///
/// Arguments go to the server verbatim; the server's result text is the
/// assistant-facing string and its raw result object is the structured
/// payload.  Schema validation is the server's job — the proxy only
/// requires an object.
pub struct McpProxyTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
    registry_name: String,
}

impl McpProxyTool {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let registry_name = crate::bridged_name(client.server_name(), &info.name);
        Self {
            client,
            info,
            registry_name,
        }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.registry_name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    fn capability(&self) -> Capability {
        // The bridge cannot know what the remote side does; treating it
        // as network-bound gives it concurrency and the network timeout.
        Capability::Network
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        if !args.is_object() {
            return Err("arguments must be an object".into());
        }
        Ok(())
    }

    async fn execute(&self, _state: &ToolState, call: &ToolCall) -> ToolOutput {
        match self.client.call_tool(&self.info.name, call.args.clone()).await {
            Ok((text, is_error, raw)) => {
                if is_error {
                    let mut out = ToolOutput::err(&call.id, text);
                    out.payload = raw;
                    out
                } else {
                    ToolOutput::ok_with_payload(&call.id, text, raw)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("mcp call failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
