//! Configuration management.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `patchgraph.toml` file
//! 3. User config `~/.config/patchgraph/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors. Always fatal: a run never starts with invalid
/// tunables.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion configuration.
    pub ingest: IngestConfig,

    /// Embedding model configuration.
    pub embedding: EmbeddingConfig,

    /// Query engine configuration.
    pub query: QueryConfig,

    /// Context assembly configuration.
    pub context: ContextConfig,

    /// Storage configuration.
    pub storage: StorageConfig,

    /// Patch-generation LLM configuration.
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
            query: QueryConfig::default(),
            context: ContextConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./patchgraph.toml` (project local)
    /// 2. `~/.config/patchgraph/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("patchgraph.toml").exists() {
            return Self::from_file("patchgraph.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("patchgraph").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) {
            if let Ok(value) = std::env::var(name) {
                if let Ok(parsed) = value.parse() {
                    *target = parsed;
                }
            }
        }

        parse_env("PATCHGRAPH_BATCH_SIZE", &mut self.ingest.batch_size);
        parse_env("PATCHGRAPH_CONCURRENCY", &mut self.ingest.concurrency);
        parse_env("PATCHGRAPH_MAX_RETRIES", &mut self.ingest.max_retries);
        parse_env("PATCHGRAPH_TOP_K", &mut self.query.top_k);
        parse_env("PATCHGRAPH_MIN_SIMILARITY", &mut self.query.min_similarity);
        parse_env("PATCHGRAPH_MAX_HOPS", &mut self.query.max_hops);
        parse_env("PATCHGRAPH_ENTITY_BUDGET", &mut self.query.entity_budget);
        parse_env("PATCHGRAPH_HOP_DECAY", &mut self.query.hop_decay);
        parse_env("PATCHGRAPH_TOKEN_BUDGET", &mut self.context.token_budget);

        if let Ok(model) = std::env::var("PATCHGRAPH_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(db_path) = std::env::var("PATCHGRAPH_DB_PATH") {
            self.storage.db_path = db_path;
        }
        if let Ok(url) = std::env::var("PATCHGRAPH_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("PATCHGRAPH_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("PATCHGRAPH_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }

    /// Reject tunables outside their valid ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if self.ingest.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be positive".into()));
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if self.query.entity_budget == 0 {
            return Err(ConfigError::Invalid(
                "entity_budget must be positive".into(),
            ));
        }
        if !(self.query.hop_decay > 0.0 && self.query.hop_decay < 1.0) {
            return Err(ConfigError::Invalid(
                "hop_decay must be strictly between 0 and 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.query.min_similarity) {
            return Err(ConfigError::Invalid(
                "min_similarity must be between 0 and 1".into(),
            ));
        }
        if self.context.token_budget == 0 {
            return Err(ConfigError::Invalid(
                "token_budget must be positive".into(),
            ));
        }
        if self.embedding.model.is_empty() {
            return Err(ConfigError::Invalid(
                "embedding model must not be empty".into(),
            ));
        }
        if let Some(version) = &self.embedding.model_version {
            if version.is_empty() {
                return Err(ConfigError::Invalid(
                    "model_version must not be empty when set".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// File extensions to index (without leading dot).
    pub include_extensions: Vec<String>,

    /// Maximum size of a single file to index (in bytes).
    pub max_file_size: u64,

    /// Entities per embedding batch.
    pub batch_size: usize,

    /// Concurrent backend writes.
    pub concurrency: usize,

    /// Attempts per embedding batch or backend write before giving up.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries (milliseconds).
    pub retry_base_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name, resolved against the fastembed catalog.
    pub model: String,

    /// Model cache directory; defaults to `~/.patchgraph/cache`.
    pub cache_dir: Option<PathBuf>,

    /// Version tag stored with every vector. Defaults to the model name,
    /// so switching models never mixes incompatible vector spaces.
    pub model_version: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            cache_dir: None,
            model_version: None,
        }
    }
}

/// Query engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Seeds requested from the vector index.
    pub top_k: usize,

    /// Minimum cosine similarity for a seed to be retained.
    pub min_similarity: f32,

    /// Maximum graph expansion depth from any seed.
    pub max_hops: usize,

    /// Maximum total entities in a query context.
    pub entity_budget: usize,

    /// Per-hop score discount, strictly between 0 and 1.
    pub hop_decay: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            max_hops: DEFAULT_MAX_HOPS,
            entity_budget: DEFAULT_ENTITY_BUDGET,
            hop_decay: DEFAULT_HOP_DECAY,
        }
    }
}

/// Context assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for assembled context.
    pub token_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

/// Patch-generation LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for an OpenAI-compatible API.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// API key (can also be set via environment variable).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Maximum tokens for response.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
        }
    }
}

impl LlmConfig {
    /// Get API key from config or environment.
    pub fn api_key_or_env(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("PATCHGRAPH_LLM_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.query.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[ingest]
batch_size = 16

[query]
top_k = 4
hop_decay = 0.3

[storage]
db_path = ".custom/db"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ingest.batch_size, 16);
        assert_eq!(config.query.top_k, 4);
        assert_eq!(config.query.hop_decay, 0.3);
        assert_eq!(config.storage.db_path, ".custom/db");
        // Untouched sections keep their defaults.
        assert_eq!(config.context.token_budget, DEFAULT_TOKEN_BUDGET);
    }

    #[test]
    fn test_invalid_hop_decay_rejected() {
        let mut config = Config::default();
        config.query.hop_decay = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.query.hop_decay = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.ingest.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[ingest]"));
        assert!(toml_str.contains("[query]"));
        assert!(toml_str.contains("[context]"));
    }
}
