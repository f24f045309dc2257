// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Recursive sub-agents and the one-shot entry façade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kodelet_model::{Provider, Usage};
use kodelet_tools::{standard_registry, Capability, Tool, ToolCall, ToolOutput, ToolRegistry, ToolState};

use crate::{
    runtime::Runtime,
    thread::{SendOptions, Thread, ThreadConfig, UsageSink},
};

/// Nesting ceiling for sub-agents spawning sub-agents.
const MAX_DEPTH: usize = 3;

/// Tools available inside a sub-agent.  The sub-agent tool itself is not
/// in the list, and the reduced set keeps nested agents read-mostly.
const SUB_AGENT_TOOLS: &[&str] = &["read_file", "grep", "glob", "bash", "web_fetch", "think"];

/// Spawns a nested thread to complete a focused task and returns its final
/// text as the tool result.  Usage from the inner thread is attributed to
/// the outer thread through the shared sink.
pub struct SubAgentTool {
    runtime: Arc<Runtime>,
    provider: Arc<dyn Provider>,
    usage: UsageSink,
    depth: Arc<AtomicUsize>,
}

impl SubAgentTool {
    pub fn new(runtime: Arc<Runtime>, provider: Arc<dyn Provider>, usage: UsageSink) -> Self {
        Self {
            runtime,
            provider,
            usage,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn build_inner_registry(&self) -> Result<ToolRegistry, kodelet_tools::UnknownTool> {
        let full = standard_registry(&self.runtime.config.tools);
        let allow: Vec<String> = SUB_AGENT_TOOLS.iter().map(|s| s.to_string()).collect();
        full.filter(&allow)
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text.\n\
         The sub-agent gets a reduced tool set (read_file, grep, glob, bash,\n\
         web_fetch, think) and its own context window — useful for delegating\n\
         exploration that would flood this conversation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Complete task description for the sub-agent"
                },
                "max_turns": {
                    "type": "integer",
                    "description": "Turn cap for the sub-agent (default 20)"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn capability(&self) -> Capability {
        Capability::LongRunning
    }

    fn timeout(&self) -> Duration {
        // Inner threads make many provider calls; the bash default is far
        // too tight for them.
        Duration::from_secs(600)
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        match args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => Ok(()),
            Some(_) => Err("'prompt' must not be empty".into()),
            None => Err("missing required parameter 'prompt'".into()),
        }
    }

    async fn execute(&self, _state: &ToolState, call: &ToolCall) -> ToolOutput {
        let prompt = call.args["prompt"].as_str().unwrap_or_default();
        let max_turns = call.args.get("max_turns").and_then(|v| v.as_u64()).unwrap_or(20) as u32;

        let depth = self.depth.load(Ordering::Relaxed);
        if depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(depth = depth + 1, "spawning sub-agent");

        let registry = match self.build_inner_registry() {
            Ok(r) => r,
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                return ToolOutput::err(&call.id, e.to_string());
            }
        };

        let config = ThreadConfig {
            max_turns,
            // Sub-agent turns are throwaway context; never persist them.
            persist: false,
            ..ThreadConfig::from_config(&self.runtime.config)
        };
        let mut thread = Thread::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.provider),
            Arc::new(registry),
            config,
            // Shared sink: inner usage lands in the outer thread's totals.
            Arc::clone(&self.usage),
        );

        let result = thread
            .send_message(&CancellationToken::new(), prompt, SendOptions::default())
            .await;
        self.depth.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(text) if text.is_empty() => {
                ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
            }
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}

/// One-shot façade: send a single message on a fresh thread and return the
/// final text plus the usage it consumed.  Used by CLI glue and anything
/// that wants an answer without holding a thread.
pub async fn send_and_collect(
    runtime: Arc<Runtime>,
    registry: Arc<ToolRegistry>,
    query: &str,
    opts: SendOptions,
) -> anyhow::Result<(String, Usage)> {
    let provider = runtime.provider()?;
    let usage: UsageSink = Arc::new(std::sync::Mutex::new(Usage::default()));
    let mut thread = Thread::new(
        Arc::clone(&runtime),
        provider,
        registry,
        ThreadConfig {
            persist: false,
            ..ThreadConfig::from_config(&runtime.config)
        },
        Arc::clone(&usage),
    );
    let text = thread
        .send_message(&CancellationToken::new(), query, opts)
        .await?;
    let total = *usage.lock().expect("usage sink poisoned");
    Ok((text, total))
}
