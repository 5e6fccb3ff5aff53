//! Configuration management for recon-ingest
//!
//! Settings come from an optional TOML file; command-line flags override
//! individual values after loading.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection settings
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Batching configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Hostname correlation configuration
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

/// Qdrant connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_host")]
    pub host: String,

    #[serde(default = "default_qdrant_port")]
    pub port: u16,

    /// Full URL; takes precedence over host/port when set
    #[serde(default = "default_qdrant_url")]
    pub url: Option<String>,

    /// Environment variable name holding the API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub api_key_env: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            host: default_qdrant_host(),
            port: default_qdrant_port(),
            url: default_qdrant_url(),
            api_key_env: default_qdrant_api_key_env(),
        }
    }
}

impl QdrantConfig {
    /// The URL the client should connect to
    pub fn resolved_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// API key from the configured environment variable, if any
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector size of the destination collection
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Try the local model before falling back to hash vectors
    #[serde(default = "default_embedding_use_model")]
    pub use_model: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            use_model: default_embedding_use_model(),
        }
    }
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        _ => None,
    }
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Points per upsert call
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
        }
    }
}

/// Correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_enabled")]
    pub enabled: bool,

    /// Candidate collections, probed in order; unset means the tool's own list
    #[serde(default)]
    pub collections: Option<Vec<String>>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: default_correlation_enabled(),
            collections: None,
        }
    }
}

impl Config {
    /// Default config location (`~/.config/recon-ingest/config.toml`)
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recon-ingest")
            .join("config.toml")
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an explicit config file, or the default file if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_config_path();
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            debug!("No config file at {}, using defaults", default_path.display());
            Ok(Self::default())
        }
    }

    /// Check values that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            return Err(Error::Config("ingest.batch_size must be at least 1".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self
            .correlation
            .collections
            .iter()
            .flatten()
            .any(|name| name.trim().is_empty())
        {
            return Err(Error::Config(
                "correlation.collections must not contain empty names".to_string(),
            ));
        }
        if let Some(expected) = embedding_dimension_for_model(&self.embedding.model) {
            if expected != self.embedding.dimension {
                warn!(
                    "Model '{}' produces {} dimensions but the collection uses {}; hash embeddings will be used",
                    self.embedding.model, expected, self.embedding.dimension
                );
            }
        }
        Ok(())
    }
}
