//! QCT Configuration Management
//!
//! Handles configuration from environment variables and TOML config
//! files with sensible defaults for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vector store connection
    pub store: StoreConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Cache sizing and expiry
    pub cache: CacheConfig,

    /// Dispatcher behaviour
    pub tool: ToolConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Qdrant
        if let Ok(url) = std::env::var("QDRANT_URL") {
            self.store.qdrant_url = url;
        }
        if let Ok(key) = std::env::var("QDRANT_API_KEY") {
            self.store.qdrant_api_key = Some(key);
        }

        // Embeddings
        if let Some(provider) = env_parse::<EmbeddingProvider>("EMBEDDING_PROVIDER")? {
            self.embedding.provider = provider;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.embedding.openai_base_url = url;
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        // Tool
        if let Some(secs) = env_parse("QCT_REQUEST_TIMEOUT_SECS")? {
            self.tool.request_timeout_secs = secs;
        }
        if let Some(auto_create) = env_parse("QCT_AUTO_CREATE_COLLECTIONS")? {
            self.tool.auto_create_collections = auto_create;
        }

        // Cache
        if let Some(capacity) = env_parse("QCT_CACHE_EMBEDDING_CAPACITY")? {
            self.cache.embedding_max_capacity = capacity;
        }
        if let Some(capacity) = env_parse("QCT_CACHE_SEARCH_CAPACITY")? {
            self.cache.search_max_capacity = capacity;
        }
        if let Some(ttl) = env_parse("QCT_CACHE_EMBEDDING_TTL_SECS")? {
            self.cache.embedding_ttl_seconds = ttl;
        }
        if let Some(ttl) = env_parse("QCT_CACHE_SEARCH_TTL_SECS")? {
            self.cache.search_ttl_seconds = ttl;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Check values that cannot be defaulted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.qdrant_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("QDRANT_URL".to_string()));
        }
        if self.tool.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "QCT_REQUEST_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.cache.embedding_max_capacity == 0 || self.cache.search_max_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache capacity".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Vector store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Qdrant gRPC URL
    pub qdrant_url: String,

    /// Qdrant API key (required for Qdrant Cloud)
    pub qdrant_api_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider to use
    pub provider: EmbeddingProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible APIs)
    pub openai_base_url: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Embedding model name
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAI,
    Ollama,
}

impl FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Cache sizing and expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in embedding cache
    pub embedding_max_capacity: u64,

    /// Maximum number of entries in search result cache
    pub search_max_capacity: u64,

    /// Time-to-live for embedding cache entries (in seconds)
    pub embedding_ttl_seconds: u64,

    /// Time-to-live for search result cache entries (in seconds)
    pub search_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 10k embeddings @ ~6KB each (1536 x f32) = ~60MB
            embedding_max_capacity: 10_000,
            search_max_capacity: 1_000,
            // Embeddings are stable, cache for 1 hour
            embedding_ttl_seconds: 3600,
            // Search results are also invalidated on every write
            search_ttl_seconds: 300,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Timeout applied to each external call (in seconds)
    pub request_timeout_secs: u64,

    /// Create a missing collection on `add`
    pub auto_create_collections: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            auto_create_collections: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store.qdrant_url, "http://localhost:6334");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(config.tool.auto_create_collections);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedding_provider_parse() {
        assert_eq!(
            "openai".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Ollama
        );
        assert!("invalid".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [store]
            qdrant_url = "http://qdrant:6334"

            [cache]
            search_max_capacity = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.store.qdrant_url, "http://qdrant:6334");
        assert_eq!(config.cache.search_max_capacity, 50);
        assert_eq!(config.cache.embedding_max_capacity, 10_000);
        assert_eq!(config.tool.request_timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = AppConfig::default();
        config.store.qdrant_url = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.tool.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
