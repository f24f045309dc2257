// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Line-delimited JSON-RPC 2.0 client for stdio MCP servers.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use kodelet_config::McpServerConfig;

/// Protocol revision sent in `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Per-request timeout for RPC round-trips.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool discovered from a server via `tools/list`.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct McpClient {
    server_name: String,
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<FramedWrite<ChildStdin, LinesCodec>>,
    /// Kept alive so the server process dies with the client.
    _child: Child,
}

impl McpClient {
    /// Spawn the server process and complete the `initialize` handshake.
    pub async fn spawn(name: &str, cfg: &McpServerConfig) -> anyhow::Result<Arc<Self>> {
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args)
            .envs(&cfg.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("server stdout unavailable"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let client = Arc::new(Self {
            server_name: name.to_string(),
            next_id: AtomicU64::new(1),
            pending: Arc::clone(&pending),
            writer: Mutex::new(FramedWrite::new(stdin, LinesCodec::new())),
            _child: child,
        });

        // Reader task: route responses to their pending requests; drop
        // notifications (nothing in the bridge consumes them yet).
        let server = name.to_string();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(server = %server, error = %e, "mcp read error");
                        break;
                    }
                };
                let msg: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(server = %server, error = %e, "mcp sent invalid JSON");
                        continue;
                    }
                };
                if let Some(id) = msg["id"].as_u64() {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(msg);
                    }
                } else {
                    debug!(server = %server, method = %msg["method"], "mcp notification ignored");
                }
            }
            // Server closed; fail everything still waiting.
            pending.lock().await.clear();
        });

        client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": { "name": "kodelet", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": {},
                }),
            )
            .await?;
        client.notify("notifications/initialized", json!({})).await?;
        Ok(client)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn send_raw(&self, payload: &Value) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(payload.to_string()).await?;
        Ok(())
    }

    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        self.send_raw(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    /// One JSON-RPC round trip.  Errors on RPC error objects, timeouts,
    /// and a closed server.
    pub async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.send_raw(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| {
                anyhow::anyhow!("mcp request {method:?} timed out after {REQUEST_TIMEOUT:?}")
            })?
            .map_err(|_| anyhow::anyhow!("mcp server {} closed", self.server_name))?;

        if let Some(err) = response.get("error") {
            anyhow::bail!("mcp error from {}: {err}", self.server_name);
        }
        Ok(response["result"].clone())
    }

    /// Discover the server's tools.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<McpToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result["tools"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("tools/list returned no tools array"))?;
        Ok(tools
            .iter()
            .filter_map(|t| {
                Some(McpToolInfo {
                    name: t["name"].as_str()?.to_string(),
                    description: t["description"].as_str().unwrap_or("").to_string(),
                    input_schema: t
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object" })),
                })
            })
            .collect())
    }

    /// Invoke a tool, returning `(text, is_error, raw_result)`.
    /// Text content blocks are concatenated; the raw result is preserved
    /// for the structured payload.
    pub async fn call_tool(
        &self,
        tool: &str,
        args: Value,
    ) -> anyhow::Result<(String, bool, Value)> {
        let result = self
            .request("tools/call", json!({ "name": tool, "arguments": args }))
            .await?;
        let is_error = result["isError"].as_bool().unwrap_or(false);
        let text = result["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok((text, is_error, result))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
