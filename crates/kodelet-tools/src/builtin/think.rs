// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{require_str, Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// A scratchpad with no side effects.  Giving the model a place to write
/// intermediate reasoning improves multi-step tool plans; the thought is
/// acknowledged and otherwise discarded.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a thought while working through a complex problem. Has no side\n\
         effects and returns immediately. Use it to reason about tool results\n\
         before acting on them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The thought to record"
                }
            },
            "required": ["thought"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        require_str(args, "thought")?;
        Ok(())
    }

    async fn execute(&self, _state: &ToolState, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "thought recorded")
    }
}
