// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the user
/// explicitly disables them need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Conversation store backend selection.
    #[serde(default)]
    pub store: StoreBackend,
    /// External MCP servers to connect at startup.
    ///
    /// Tools discovered from server `S` are exposed as `mcp_<S>_<tool>`:
    ///
    /// ```yaml
    /// mcp_servers:
    ///   filesystem:
    ///     command: npx
    ///     args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
    /// ```
    #[serde(default)]
    pub mcp_servers: std::collections::HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "anthropic-subscription" |
    /// "openai" | "google" | "copilot" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Cheaper model used when a caller asks for the weak model
    /// (e.g. `kodelet run --use-weak-model`, sub-agent summaries).
    pub weak_name: Option<String>,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies and gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Subscription account alias.  Empty resolves to the default account.
    #[serde(default)]
    pub account: Option<String>,
    /// Attach prompt-cache markers to the system prompt and the longest
    /// stable history prefix (Anthropic only; a no-op elsewhere).
    #[serde(default = "default_true")]
    pub prompt_cache: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            weak_name: Some("claude-haiku-4-5".into()),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(8192),
            temperature: Some(0.2),
            account: None,
            prompt_cache: true,
        }
    }
}

fn default_max_turns() -> u32 {
    0
}
fn default_compact_ratio() -> f32 {
    0.8
}
fn default_compaction_keep_recent() -> usize {
    6
}
fn default_tool_result_token_cap() -> usize {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum provider calls per SendMessage.  0 means no limit; when the
    /// cap is reached the model is given one final tool-free turn to
    /// summarise and stop.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Context-utilization fraction at which auto-compaction triggers.
    /// 0.0 fires on every turn; 1.0 never fires.
    #[serde(default = "default_compact_ratio")]
    pub compact_ratio: f32,
    /// Disable auto-compaction entirely.
    #[serde(default)]
    pub disable_auto_compact: bool,
    /// Number of recent non-system messages preserved verbatim during
    /// compaction.  Everything older is summarised.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Maximum tokens allowed for a single tool result before deterministic
    /// truncation.  0 disables per-result truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            compact_ratio: default_compact_ratio(),
            disable_auto_compact: false,
            compaction_keep_recent: default_compaction_keep_recent(),
            tool_result_token_cap: default_tool_result_token_cap(),
            system_prompt: None,
        }
    }
}

fn default_bash_timeout() -> u64 {
    120
}
fn default_file_timeout() -> u64 {
    30
}
fn default_network_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Explicit tool allow-list.  Empty allows all registered tools.
    /// Unknown names fail at registry build time, not at dispatch.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Shell commands the bash tool may run, matched against the first
    /// word of each command.  Empty allows any command.
    #[serde(default)]
    pub bash_allow: Vec<String>,
    /// Bash tool timeout in seconds.
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,
    /// File-operation tool timeout in seconds.
    #[serde(default = "default_file_timeout")]
    pub file_timeout_secs: u64,
    /// Network-fetch tool timeout in seconds.
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
    /// Directory of user-declared custom tool manifests
    /// (defaults to `~/.kodelet/tools`).
    #[serde(default)]
    pub custom_dir: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            bash_allow: Vec::new(),
            bash_timeout_secs: default_bash_timeout(),
            file_timeout_secs: default_file_timeout(),
            network_timeout_secs: default_network_timeout(),
            custom_dir: None,
        }
    }
}

/// Conversation store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per conversation under `~/.kodelet/conversations`.
    #[default]
    File,
    /// Single SQLite database at `~/.kodelet/conversations.db`.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable to spawn for a stdio server.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
