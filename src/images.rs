// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! `--image` argument handling: local files become base64 data URLs,
//! HTTPS URLs pass through for providers that accept remote references.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

fn mime_for(path: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn resolve(images: &[String]) -> anyhow::Result<Vec<String>> {
    images
        .iter()
        .map(|img| {
            if img.starts_with("https://") || img.starts_with("data:") {
                return Ok(img.clone());
            }
            let mime = mime_for(img)
                .with_context(|| format!("unsupported image type: {img}"))?;
            let bytes =
                std::fs::read(img).with_context(|| format!("reading image {img}"))?;
            Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
        })
        .collect()
}
