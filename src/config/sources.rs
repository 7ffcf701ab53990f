// src/config/sources.rs
//! Source Registry: the ordered list of feeds, their enabled flag and their
//! free-text relevance criteria. Read-only to the pipeline.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SOURCES_PATH: &str = "SOURCES_CONFIG_PATH";

fn default_enabled() -> bool {
    true
}

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePolicy {
    pub name: String,
    #[serde(alias = "fetch_address")]
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub criteria: Option<String>,
    /// Informational only ("high", "medium", ...).
    #[serde(default)]
    pub priority: Option<String>,
}

impl SourcePolicy {
    /// Criteria text, if any non-blank criteria is configured.
    pub fn criteria(&self) -> Option<&str> {
        self.criteria.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// Ordered, validated registry. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourcePolicy>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourcePolicy>) -> Result<Self> {
        let sources = clean_list(sources)?;
        Ok(Self { sources })
    }

    pub fn all(&self) -> &[SourcePolicy] {
        &self.sources
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourcePolicy> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&SourcePolicy> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Load the registry from an explicit path. Supports TOML or JSON formats.
pub fn load_registry_from(path: &Path) -> Result<SourceRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source registry from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let list = parse_registry(&content, ext.as_str())
        .with_context(|| format!("parsing source registry {}", path.display()))?;
    SourceRegistry::new(list)
}

/// Load the registry using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
///
/// A missing registry is an error: without it no stage can do anything useful.
pub fn load_registry_default() -> Result<SourceRegistry> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_registry_from(&pb);
        } else {
            return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_registry_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_registry_from(&json_p);
    }
    bail!("no source registry found (set {ENV_SOURCES_PATH} or create config/sources.toml)")
}

fn parse_registry(s: &str, hint_ext: &str) -> Result<Vec<SourcePolicy>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported source registry format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourcePolicy>> {
    #[derive(Deserialize)]
    struct TomlRegistry {
        #[serde(default)]
        sources: Vec<SourcePolicy>,
    }
    let v: TomlRegistry = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<SourcePolicy>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonRegistry {
        List(Vec<SourcePolicy>),
        Wrapped { sources: Vec<SourcePolicy> },
    }
    let v: JsonRegistry = serde_json::from_str(s)?;
    Ok(match v {
        JsonRegistry::List(l) => l,
        JsonRegistry::Wrapped { sources } => sources,
    })
}

fn clean_list(items: Vec<SourcePolicy>) -> Result<Vec<SourcePolicy>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        it.url = it.url.trim().to_string();
        if it.name.is_empty() {
            bail!("source with empty name (url: {})", it.url);
        }
        if it.url.is_empty() {
            bail!("source '{}' has no url", it.name);
        }
        if !seen.insert(it.name.clone()) {
            bail!("duplicate source name '{}'", it.name);
        }
        if it.criteria.as_deref().is_some_and(|c| c.trim().is_empty()) {
            it.criteria = None;
        }
        out.push(it);
    }
    Ok(out)
}
