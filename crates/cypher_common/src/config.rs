//! CYPHER configuration.
//!
//! Configuration lives in `cypher.toml` next to the daemon unless
//! `--config` / `CYPHER_CONFIG` points elsewhere. Every field has a
//! default, so a missing file is a valid setup.

use crate::emotion::LONGEST_TAG_LEN;
use crate::tiers::{ModelTier, TierCatalog, TierError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name
pub const CONFIG_FILE: &str = "cypher.toml";

/// Environment variable that overrides the config path
pub const CONFIG_ENV: &str = "CYPHER_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Tiers(#[from] TierError),
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Frontend directory served at `/` (disabled when unset)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: None,
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Inline API key (takes precedence over `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for non-streaming calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl LlmSettings {
    /// API key from the config file, else from the environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Candidate models per tier, in failover order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    #[serde(default = "default_primary_models")]
    pub primary: Vec<String>,

    #[serde(default = "default_fast_models")]
    pub fast: Vec<String>,

    #[serde(default = "default_primary_temperature")]
    pub primary_temperature: f32,

    #[serde(default = "default_fast_temperature")]
    pub fast_temperature: f32,
}

fn default_primary_models() -> Vec<String> {
    vec!["llama-3.3-70b-versatile".to_string()]
}

fn default_fast_models() -> Vec<String> {
    vec!["llama-3.1-8b-instant".to_string(), "gemma2-9b-it".to_string()]
}

fn default_primary_temperature() -> f32 {
    0.6
}

fn default_fast_temperature() -> f32 {
    0.4
}

impl TierSettings {
    pub fn temperature(&self, tier: ModelTier) -> f32 {
        match tier {
            ModelTier::Primary => self.primary_temperature,
            ModelTier::Fast => self.fast_temperature,
        }
    }

    pub fn catalog(&self) -> Result<TierCatalog, TierError> {
        TierCatalog::new(self.primary.clone(), self.fast.clone())
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            primary: default_primary_models(),
            fast: default_fast_models(),
            primary_temperature: default_primary_temperature(),
            fast_temperature: default_fast_temperature(),
        }
    }
}

/// Response pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Characters buffered before the emotion tag scan
    #[serde(default = "default_lookahead")]
    pub lookahead_chars: usize,

    /// Stored messages sent back upstream as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_lookahead() -> usize {
    25
}

fn default_history_limit() -> usize {
    5
}

impl StreamSettings {
    /// Lookahead never shorter than the longest tag literal
    pub fn effective_lookahead(&self) -> usize {
        self.lookahead_chars.max(LONGEST_TAG_LEN)
    }

    pub fn lookahead_was_clamped(&self) -> bool {
        self.lookahead_chars != self.effective_lookahead()
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            lookahead_chars: default_lookahead(),
            history_limit: default_history_limit(),
        }
    }
}

/// Conversation database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("cypher.db")
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

/// Long-term profile document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default = "default_profile_path")]
    pub path: PathBuf,
}

fn default_profile_path() -> PathBuf {
    PathBuf::from("memory.json")
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            path: default_profile_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete CYPHER configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CypherConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub tiers: TierSettings,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub profile: ProfileSettings,

    #[serde(default)]
    pub log: LogConfig,
}

impl CypherConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.tiers.catalog()?;
        Ok(config)
    }
}

/// Config path from an explicit flag, the environment, or the default
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(CONFIG_FILE)
}
