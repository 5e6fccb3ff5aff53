//! Deterministic hash-derived embeddings
//!
//! No semantic similarity: identical text gives identical vectors, nothing more.

use super::Embedder;
use crate::error::Result;
use async_trait::async_trait;

/// Embedder that stretches a BLAKE3 digest of the text to the target dimension
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embed one text; infallible
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut bytes = vec![0u8; self.dimension];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        bytes.into_iter().map(|b| (b as f32 / 127.5) - 1.0).collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "blake3-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_is_deterministic() {
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed_text("www.example.com A:93.184.216.34");
        let b = embedder.embed_text("www.example.com A:93.184.216.34");
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn test_hash_embedding_range_and_sensitivity() {
        let embedder = HashEmbedder::new(1000);
        let a = embedder.embed_text("alpha.example.com");
        let b = embedder.embed_text("beta.example.com");
        assert_ne!(a, b);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_hash_embedding_prefix_stable_across_dimensions() {
        let short = HashEmbedder::new(16).embed_text("mail.example.com");
        let long = HashEmbedder::new(64).embed_text("mail.example.com");
        assert_eq!(short[..], long[..16]);
    }
}
