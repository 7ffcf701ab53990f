// src/config/pipeline.rs
//! Stage tunables. Every field has a default so an absent `config/pipeline.toml`
//! is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_DB_PATH: &str = "CURATOR_DB_PATH";
pub const ENV_BIND: &str = "CURATOR_BIND";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreCfg,
    pub fetch: FetchCfg,
    pub resolve: ResolveCfg,
    pub judge: JudgeCfg,
    pub select: SelectCfg,
    pub cycle: CycleCfg,
    pub serve: ServeCfg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    pub path: PathBuf,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/curator.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchCfg {
    /// Entries considered per source per cycle (newest-first as given by the source).
    pub max_entries: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    pub source_delay_ms: u64,
    pub summary_max_chars: usize,
}

impl Default for FetchCfg {
    fn default() -> Self {
        Self {
            max_entries: 30,
            max_attempts: 3,
            retry_backoff_ms: 3_000,
            timeout_secs: 30,
            source_delay_ms: 1_000,
            summary_max_chars: 2_000,
        }
    }
}

impl FetchCfg {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolveCfg {
    pub batch_limit: usize,
    /// Extracted text must be strictly longer than this (in characters).
    pub min_chars: usize,
    pub timeout_secs: u64,
    pub delay_ms: u64,
    pub max_stored_chars: usize,
    /// Unresolved items become eligible again after this many hours; 0 = never.
    pub retry_cooldown_hours: u64,
}

impl Default for ResolveCfg {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            min_chars: 500,
            timeout_secs: 10,
            delay_ms: 1_000,
            max_stored_chars: 30_000,
            retry_cooldown_hours: 168,
        }
    }
}

impl ResolveCfg {
    pub fn retry_cooldown(&self) -> Option<chrono::Duration> {
        (self.retry_cooldown_hours > 0)
            .then(|| chrono::Duration::hours(self.retry_cooldown_hours as i64))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeCfg {
    pub batch_limit: usize,
    pub min_chars: usize,
    pub sample_chars: usize,
    pub delay_ms: u64,
    pub short_content_score: f64,
    pub neutral_score: f64,
    pub error_score: f64,
}

impl Default for JudgeCfg {
    fn default() -> Self {
        Self {
            batch_limit: 200,
            min_chars: 50,
            sample_chars: 3_000,
            delay_ms: 500,
            short_content_score: 40.0,
            neutral_score: 50.0,
            error_score: 40.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectCfg {
    pub threshold: f64,
    pub limit: usize,
    pub prefetch: usize,
    pub recency_days: i64,
    pub evergreen_score: f64,
}

impl Default for SelectCfg {
    fn default() -> Self {
        Self {
            threshold: 50.0,
            limit: 100,
            prefetch: 500,
            recency_days: 90,
            evergreen_score: 80.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleCfg {
    pub prefetch_fulltext_limit: usize,
    pub prefetch_fulltext_days: i64,
}

impl Default for CycleCfg {
    fn default() -> Self {
        Self {
            prefetch_fulltext_limit: 120,
            prefetch_fulltext_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeCfg {
    pub bind: String,
    pub cache_ttl_secs: u64,
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for ServeCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5006".to_string(),
            cache_ttl_secs: 30 * 60,
            title: "Curated Feed".to_string(),
            link: "http://localhost:5006/feed.xml".to_string(),
            description: "Feed items selected by per-source relevance criteria".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&data)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg)
    }

    /// $PIPELINE_CONFIG_PATH, else `config/pipeline.toml` if present, else defaults.
    /// Env overrides for the DB path and bind address are applied last.
    pub fn load_default() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            Ok(p) => Self::load_from_file(p)?,
            Err(_) => {
                let p = Path::new(DEFAULT_PIPELINE_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(p) = std::env::var(ENV_DB_PATH) {
            if !p.trim().is_empty() {
                self.store.path = PathBuf::from(p.trim());
            }
        }
        if let Ok(b) = std::env::var(ENV_BIND) {
            if !b.trim().is_empty() {
                self.serve.bind = b.trim().to_string();
            }
        }
    }

    /// Zero out every inter-call delay and backoff (tests, one-off local runs).
    pub fn without_delays(mut self) -> Self {
        self.fetch.retry_backoff_ms = 0;
        self.fetch.source_delay_ms = 0;
        self.resolve.delay_ms = 0;
        self.judge.delay_ms = 0;
        self
    }
}
