// src/config/oracle.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_ORACLE_CONFIG_PATH: &str = "config/oracle.json";
pub const ENV_ORACLE_CONFIG_PATH: &str = "ORACLE_CONFIG_PATH";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

fn default_enabled() -> bool {
    true
}
fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Any OpenAI-compatible chat-completions endpoint root.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl OracleConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: OracleConfig = serde_json::from_str(&data)?;
        Ok(cfg.resolved())
    }

    /// $ORACLE_CONFIG_PATH, else `config/oracle.json` if present, else defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_ORACLE_CONFIG_PATH) {
            return Self::load_from_file(p);
        }
        let p = Path::new(DEFAULT_ORACLE_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(p);
        }
        Ok(Self::default().resolved())
    }

    /// Resolve the "ENV" key indirection and normalize the endpoint root.
    /// A missing key is not an error here: the oracle reports it per call and the
    /// judge maps that to its fallback score.
    pub fn resolved(mut self) -> Self {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var(ENV_API_KEY).unwrap_or_default();
        }
        if let Ok(url) = env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}
