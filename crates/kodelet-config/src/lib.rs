// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{home_dir, kodelet_dir, load};
pub use schema::{
    AgentConfig, Config, McpServerConfig, ModelConfig, StoreBackend, ToolsConfig,
};
