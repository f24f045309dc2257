// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{Tool, ToolState};

/// A tool schema as handed to model providers.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// An allow-list named a tool that is not registered.  Raised when the
/// registry view is built, not at dispatch time.
#[derive(Debug, thiserror::Error)]
#[error("unknown tool in allow-list: {0:?}")]
pub struct UnknownTool(pub String);

/// Central registry holding all available tools.  Immutable after startup;
/// dispatch is by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// A view honoring an explicit allow-list.  An empty list allows all
    /// tools; invalid names fail here rather than at dispatch.
    pub fn filter(&self, allow: &[String]) -> Result<ToolRegistry, UnknownTool> {
        if allow.is_empty() {
            return Ok(ToolRegistry {
                tools: self.tools.clone(),
            });
        }
        let mut tools = HashMap::new();
        for name in allow {
            let tool = self
                .tools
                .get(name)
                .ok_or_else(|| UnknownTool(name.clone()))?;
            tools.insert(name.clone(), Arc::clone(tool));
        }
        Ok(ToolRegistry { tools })
    }

    /// Schemas for all registered tools, sorted by name for deterministic
    /// request bodies.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a single call by name.  Unknown names and validation
    /// failures become error results the model can react to.
    pub async fn execute(&self, state: &ToolState, call: &crate::ToolCall) -> crate::ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => {
                if let Err(msg) = tool.validate(&call.args) {
                    return crate::ToolOutput::err(&call.id, format!("invalid arguments: {msg}"));
                }
                tool.execute(state, call).await
            }
            None => crate::ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
