// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod bash;
mod edit_file;
mod glob;
mod grep;
mod image;
mod read_file;
mod think;
mod todo;
mod web_fetch;
mod write_file;

pub use bash::BashTool;
pub use edit_file::EditFileTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use image::ImageTool;
pub use read_file::ReadFileTool;
pub use think::ThinkTool;
pub use todo::TodoTool;
pub use web_fetch::WebFetchTool;
pub use write_file::WriteFileTool;

use kodelet_config::ToolsConfig;

use crate::ToolRegistry;

/// Build the standard registry of built-in tools from configuration.
///
/// Custom user-declared tools and bridged MCP tools are registered on top
/// of this by their respective crates.
pub fn standard_registry(cfg: &ToolsConfig) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool {
        timeout_secs: cfg.file_timeout_secs,
    });
    reg.register(WriteFileTool {
        timeout_secs: cfg.file_timeout_secs,
    });
    reg.register(EditFileTool {
        timeout_secs: cfg.file_timeout_secs,
    });
    reg.register(GrepTool);
    reg.register(GlobTool);
    reg.register(BashTool {
        timeout_secs: cfg.bash_timeout_secs,
        allow: cfg.bash_allow.clone(),
    });
    reg.register(TodoTool);
    reg.register(WebFetchTool {
        timeout_secs: cfg.network_timeout_secs,
    });
    reg.register(ImageTool);
    reg.register(ThinkTool);
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
