// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::ToolState;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// `assistant` is the string fed back to the model; `payload` is the
/// machine-structured form persisted with the conversation and used by
/// renderers.  Tool failures are data (`is_error = true`), never loop-level
/// errors.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Assistant-facing result text.
    pub assistant: String,
    /// Structured payload for persistence and rendering.
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result whose payload is just the text.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            call_id: call_id.into(),
            payload: Value::String(text.clone()),
            assistant: text,
            is_error: false,
        }
    }

    /// Successful result with an explicit structured payload.
    pub fn ok_with_payload(
        call_id: impl Into<String>,
        content: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            assistant: content.into(),
            payload,
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self {
            call_id: call_id.into(),
            payload: Value::String(text.clone()),
            assistant: text,
            is_error: true,
        }
    }
}

/// Capability tags drive executor scheduling and default timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    /// Reads local state only; runs concurrently with other tools.
    #[default]
    ReadOnly,
    /// Mutates files or process state; serializes with every other tool
    /// in the same batch.
    Mutating,
    /// Talks to the network; concurrent, with the network timeout.
    Network,
    /// Long-running subprocess (bash, sub-agents); concurrent unless it
    /// also mutates, with the long timeout.
    LongRunning,
}

impl Capability {
    /// Per-capability default execution timeout.
    pub fn default_timeout(self) -> Duration {
        match self {
            Capability::ReadOnly | Capability::Mutating => Duration::from_secs(30),
            Capability::Network => Duration::from_secs(30),
            Capability::LongRunning => Duration::from_secs(120),
        }
    }
}

/// Trait that every built-in, custom, and bridged tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    fn capability(&self) -> Capability {
        Capability::ReadOnly
    }
    /// Execution timeout; exceeded timeouts yield a timeout tool-result,
    /// not a loop error.
    fn timeout(&self) -> Duration {
        self.capability().default_timeout()
    }
    /// Parse and check arguments without side effects.  A failure message
    /// is fed back to the model as an `is_error` result.
    fn validate(&self, args: &Value) -> Result<(), String>;
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput;
}

// ─── Helpers shared by builtins ───────────────────────────────────────────────

/// Fetch a required string argument or produce the standard error message.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required parameter '{key}'"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
