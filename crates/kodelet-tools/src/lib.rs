// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool catalog, registry, and executor.
//!
//! Each tool exposes a name, description, JSON schema, a capability tag, a
//! `validate` that checks arguments without side effects, and an `execute`
//! that performs the call.  The executor runs a turn's batch with bounded
//! parallelism, serializing mutating tools and returning results in the
//! model's original request order.

pub mod builtin;
mod custom;
mod executor;
mod registry;
mod render;
mod state;
mod tool;

pub use custom::load_custom_tools;
pub use executor::{Executor, MAX_CONCURRENT_TOOLS};
pub use registry::{ToolRegistry, ToolSchema, UnknownTool};
pub use render::render_human;
pub use state::{TodoItem, ToolState};
pub use tool::{Capability, Tool, ToolCall, ToolOutput};

pub use builtin::standard_registry;
