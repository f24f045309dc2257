// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! MCP client bridge.
//!
//! Connects to configured MCP servers over stdio at startup, discovers
//! their tools, and registers a proxy for each one under the name
//! `mcp_<server>_<tool>`.  Arguments are forwarded verbatim; results are
//! passed through unchanged.

mod client;
mod proxy;

pub use client::{McpClient, McpToolInfo};
pub use proxy::McpProxyTool;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use kodelet_config::McpServerConfig;
use kodelet_tools::ToolRegistry;

/// Connect every configured server and register its tools.
///
/// A server that fails to spawn or initialize is logged and skipped — a
/// broken bridge must not take down the agent.  Returns the live clients;
/// dropping them closes the server processes.
pub async fn connect_servers(
    servers: &HashMap<String, McpServerConfig>,
    registry: &mut ToolRegistry,
) -> Vec<Arc<McpClient>> {
    let mut clients = Vec::new();
    for (name, cfg) in servers {
        let client = match McpClient::spawn(name, cfg).await {
            Ok(c) => c,
            Err(e) => {
                warn!(server = %name, error = %e, "failed to start MCP server; skipping");
                continue;
            }
        };
        let tools = match client.list_tools().await {
            Ok(t) => t,
            Err(e) => {
                warn!(server = %name, error = %e, "failed to list MCP tools; skipping");
                continue;
            }
        };
        info!(server = %name, tools = tools.len(), "connected MCP server");
        for info in tools {
            registry.register_arc(Arc::new(McpProxyTool::new(Arc::clone(&client), info)));
        }
        clients.push(client);
    }
    clients
}

/// Registry name for a bridged tool.
pub fn bridged_name(server: &str, tool: &str) -> String {
    format!("mcp_{server}_{tool}")
}
