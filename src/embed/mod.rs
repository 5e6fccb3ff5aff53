//! Embedding generation
//!
//! This module provides:
//! - A trait for different embedding backends
//! - A local FastEmbed backend (feature `local-embed`)
//! - A deterministic hash fallback
//! - [`EmbeddingStrategy`], chosen once per run, which never fails to return a vector

#[cfg(feature = "local-embed")]
mod fastembed_impl;
mod hashed;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;
pub use hashed::*;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// The embedding path selected at startup
pub enum EmbeddingStrategy {
    /// Pretrained model, with the hash embedder kept for per-call degradation
    Model {
        model: Box<dyn Embedder>,
        fallback: HashEmbedder,
    },
    /// Hash-derived vectors only
    Hashed(HashEmbedder),
}

impl EmbeddingStrategy {
    /// Pick the model path if it initializes with the right dimension, else the hash path
    pub fn select(config: &EmbeddingConfig) -> Self {
        let fallback = HashEmbedder::new(config.dimension);

        if !config.use_model {
            info!("Embedding model disabled, using hash-based embeddings");
            return EmbeddingStrategy::Hashed(fallback);
        }

        match load_model(config) {
            Ok(model) if model.dimension() == config.dimension => {
                info!("Using embedding model {}", model.model_name());
                EmbeddingStrategy::Model { model, fallback }
            }
            Ok(model) => {
                warn!(
                    "Model {} produces {} dimensions, collection needs {}; using hash-based embeddings",
                    model.model_name(),
                    model.dimension(),
                    config.dimension
                );
                EmbeddingStrategy::Hashed(fallback)
            }
            Err(e) => {
                warn!("Embedding model unavailable ({}); using hash-based embeddings", e);
                EmbeddingStrategy::Hashed(fallback)
            }
        }
    }

    /// Wrap an already constructed model
    pub fn with_model(model: Box<dyn Embedder>) -> Self {
        let fallback = HashEmbedder::new(model.dimension());
        EmbeddingStrategy::Model { model, fallback }
    }

    pub fn hashed(dimension: usize) -> Self {
        EmbeddingStrategy::Hashed(HashEmbedder::new(dimension))
    }

    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingStrategy::Model { fallback, .. } => fallback.dimension(),
            EmbeddingStrategy::Hashed(hashed) => hashed.dimension(),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            EmbeddingStrategy::Model { model, .. } => model.model_name(),
            EmbeddingStrategy::Hashed(hashed) => hashed.model_name(),
        }
    }

    /// Embed a batch; every text gets a vector of the configured dimension
    pub async fn embed_all(&self, texts: Vec<String>) -> Vec<Vec<f32>> {
        match self {
            EmbeddingStrategy::Hashed(hashed) => {
                texts.iter().map(|t| hashed.embed_text(t)).collect()
            }
            EmbeddingStrategy::Model { model, fallback } => {
                let expected = texts.len();
                match model.embed(texts.clone()).await {
                    Ok(vectors)
                        if vectors.len() == expected
                            && vectors.iter().all(|v| v.len() == fallback.dimension()) =>
                    {
                        vectors
                    }
                    Ok(_) => {
                        warn!("Embedding model returned malformed vectors; using hash fallback for this batch");
                        texts.iter().map(|t| fallback.embed_text(t)).collect()
                    }
                    Err(e) => {
                        warn!("Embedding failed ({}); using hash fallback for this batch", e);
                        texts.iter().map(|t| fallback.embed_text(t)).collect()
                    }
                }
            }
        }
    }

    /// Embed one text
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_all(vec![text.to_string()])
            .await
            .pop()
            .unwrap_or_else(|| HashEmbedder::new(self.dimension()).embed_text(text))
    }
}

#[cfg(feature = "local-embed")]
fn load_model(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FastEmbedder::new(config)?))
}

#[cfg(not(feature = "local-embed"))]
fn load_model(_config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Err(crate::error::Error::Embedding(
        "built without the local-embed feature".to_string(),
    ))
}
