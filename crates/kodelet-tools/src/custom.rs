// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! User-declared custom tools.
//!
//! A manifest in `~/.kodelet/tools/*.yaml` declares a name, description,
//! parameter schema, and a shell command.  Arguments are passed to the
//! command as `KODELET_ARG_<NAME>` environment variables.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::tool::{Capability, Tool, ToolCall, ToolOutput};
use crate::{ToolRegistry, ToolState};

#[derive(Debug, Clone, Deserialize)]
pub struct CustomToolManifest {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.  Defaults to an open object.
    #[serde(default = "default_schema")]
    pub parameters: Value,
    /// Shell command executed with `bash -c`.
    pub command: String,
    #[serde(default)]
    pub mutating: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_schema() -> Value {
    json!({ "type": "object" })
}

fn default_timeout_secs() -> u64 {
    60
}

pub struct CustomTool {
    manifest: CustomToolManifest,
}

#[async_trait]
impl Tool for CustomTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn parameters_schema(&self) -> Value {
        self.manifest.parameters.clone()
    }

    fn capability(&self) -> Capability {
        if self.manifest.mutating {
            Capability::Mutating
        } else {
            Capability::LongRunning
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.manifest.timeout_secs)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        if !args.is_object() {
            return Err("arguments must be an object".into());
        }
        // Check declared required keys; full schema validation is left to
        // the command itself.
        if let Some(required) = self.manifest.parameters["required"].as_array() {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if args.get(key).is_none() {
                    return Err(format!("missing required parameter '{key}'"));
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        debug!(tool = %self.manifest.name, "executing custom tool");
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&self.manifest.command);
        cmd.current_dir(state.working_dir());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd.env("KODELET_TOOL_ARGS", call.args.to_string());
        if let Some(obj) = call.args.as_object() {
            for (key, value) in obj {
                let env_key = format!("KODELET_ARG_{}", key.to_uppercase());
                let env_val = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(env_key, env_val);
            }
        }

        let output = match cmd.output().await {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            ToolOutput::ok(&call.id, stdout)
        } else {
            ToolOutput::err(
                &call.id,
                format!("[exit {code}]\n{stdout}{}", if stderr.is_empty() {
                    String::new()
                } else {
                    format!("\n[stderr]\n{stderr}")
                }),
            )
        }
    }
}

/// Load every `*.yaml` manifest in `dir` and register the declared tools.
/// Malformed manifests are logged and skipped so one bad file cannot take
/// down the whole catalog.
pub fn load_custom_tools(registry: &mut ToolRegistry, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return, // no custom tools directory
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read tool manifest");
                continue;
            }
        };
        match serde_yaml::from_str::<CustomToolManifest>(&raw) {
            Ok(manifest) => {
                debug!(name = %manifest.name, path = %path.display(), "registering custom tool");
                registry.register(CustomTool { manifest });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid tool manifest; skipping");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
