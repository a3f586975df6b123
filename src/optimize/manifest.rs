//! Vite build manifest lookup for preload candidates.

use std::{collections::BTreeMap, io, path::Path};

use serde::Deserialize;
use thiserror::Error;

/// At most this many manifest assets are preloaded per page.
pub const MAX_PRELOADS: usize = 2;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read build manifest: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse build manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadKind {
    Style,
    Script,
}

impl PreloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Script => "script",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preload {
    pub href: String,
    pub kind: PreloadKind,
}

impl Preload {
    pub fn link_header_value(&self) -> String {
        format!("<{}>; rel=preload; as={}", self.href, self.kind.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ManifestChunk {
    file: String,
    #[serde(default, rename = "isEntry")]
    is_entry: bool,
    #[serde(default)]
    css: Vec<String>,
}

/// Reads the manifest at `path`. A missing file yields no preloads.
pub async fn load_preloads(path: &Path, asset_base: &str) -> Result<Vec<Preload>, ManifestError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    parse_preloads(&raw, asset_base)
}

/// Entry stylesheets come first, then entry scripts.
pub fn parse_preloads(raw: &[u8], asset_base: &str) -> Result<Vec<Preload>, ManifestError> {
    let manifest: BTreeMap<String, ManifestChunk> = serde_json::from_slice(raw)?;

    let mut styles: Vec<&str> = Vec::new();
    let mut scripts: Vec<&str> = Vec::new();
    for chunk in manifest.values().filter(|chunk| chunk.is_entry) {
        if chunk.file.ends_with(".css") {
            styles.push(&chunk.file);
        } else if chunk.file.ends_with(".js") || chunk.file.ends_with(".mjs") {
            scripts.push(&chunk.file);
        }
        for css in &chunk.css {
            if !styles.contains(&css.as_str()) {
                styles.push(css);
            }
        }
    }

    let preloads = styles
        .into_iter()
        .map(|file| (file, PreloadKind::Style))
        .chain(scripts.into_iter().map(|file| (file, PreloadKind::Script)))
        .take(MAX_PRELOADS)
        .map(|(file, kind)| Preload {
            href: format!("{asset_base}{}", file.trim_start_matches('/')),
            kind,
        })
        .collect();

    Ok(preloads)
}
