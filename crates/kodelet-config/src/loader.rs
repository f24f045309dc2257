// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Resolve the user's home directory, honouring `$HOME` when `dirs` fails
/// (containers without passwd entries).
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `$HOME/.kodelet` — credentials, conversations, config, custom tools.
pub fn kodelet_dir() -> PathBuf {
    home_dir().join(".kodelet")
}

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    vec![
        kodelet_dir().join("config.yaml"),
        PathBuf::from("kodelet-config.yaml"),
    ]
}

/// Load configuration by merging all discovered YAML files, then applying
/// `KODELET_*` environment overrides.  The `extra` argument may provide an
/// explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config);

    if let Some(dir) = config.tools.custom_dir.take() {
        config.tools.custom_dir = Some(shellexpand::tilde(&dir).into_owned());
    }

    Ok(config)
}

/// `KODELET_*` environment variables override file-level settings.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(provider) = std::env::var("KODELET_PROVIDER") {
        config.model.provider = provider;
    }
    if let Ok(model) = std::env::var("KODELET_MODEL") {
        config.model.name = model;
    }
    if let Ok(weak) = std::env::var("KODELET_WEAK_MODEL") {
        config.model.weak_name = Some(weak);
    }
    if let Ok(base) = std::env::var("KODELET_BASE_URL") {
        config.model.base_url = Some(base);
    }
    if let Ok(account) = std::env::var("KODELET_ACCOUNT") {
        config.model.account = Some(account);
    }
    if let Ok(ratio) = std::env::var("KODELET_COMPACT_RATIO") {
        if let Ok(v) = ratio.parse::<f32>() {
            config.agent.compact_ratio = v;
        }
    }
    if let Ok(turns) = std::env::var("KODELET_MAX_TURNS") {
        if let Ok(v) = turns.parse::<u32>() {
            config.agent.max_turns = v;
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
