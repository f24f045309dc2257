// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::state::TodoItem;
use crate::tool::{Tool, ToolCall, ToolOutput};
use crate::ToolState;

/// Replaces the thread's todo list wholesale; the model resends the full
/// list on every update, which keeps the tool stateless on the wire.
pub struct TodoTool;

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Replace the task list for this session. Send the complete list every\n\
         time; statuses are 'pending', 'in_progress', or 'completed'. Use it to\n\
         plan multi-step work and track progress."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            }
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        let todos = args
            .get("todos")
            .and_then(|v| v.as_array())
            .ok_or("missing required parameter 'todos'")?;
        for (i, item) in todos.iter().enumerate() {
            if item.get("content").and_then(|v| v.as_str()).is_none() {
                return Err(format!("todos[{i}] is missing 'content'"));
            }
            match item.get("status").and_then(|v| v.as_str()) {
                Some("pending" | "in_progress" | "completed") => {}
                other => {
                    return Err(format!("todos[{i}] has invalid status {other:?}"));
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, state: &ToolState, call: &ToolCall) -> ToolOutput {
        let items: Vec<TodoItem> = call.args["todos"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|v| TodoItem {
                        content: v["content"].as_str().unwrap_or_default().to_string(),
                        status: v["status"].as_str().unwrap_or("pending").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let done = items.iter().filter(|t| t.status == "completed").count();
        let total = items.len();
        state.set_todos(items);

        ToolOutput::ok_with_payload(
            &call.id,
            format!("todo list updated ({done}/{total} completed)"),
            call.args.clone(),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
