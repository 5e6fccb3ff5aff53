//! Default values for configuration

/// Default Qdrant host
pub fn default_qdrant_host() -> String {
    "localhost".to_string()
}

/// Default Qdrant gRPC port (6334, not the 6333 REST port)
pub fn default_qdrant_port() -> u16 {
    6334
}

/// Default Qdrant URL, honouring `QDRANT_URL` when set
pub fn default_qdrant_url() -> Option<String> {
    std::env::var("QDRANT_URL").ok().filter(|url| !url.trim().is_empty())
}

/// Default environment variable name for the Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default embedding model (all-MiniLM-L6-v2)
pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Use the local model when it can be loaded
pub fn default_embedding_use_model() -> bool {
    true
}

/// Default number of points per upsert call
pub fn default_ingest_batch_size() -> usize {
    100
}

/// Correlation is on unless explicitly skipped
pub fn default_correlation_enabled() -> bool {
    true
}

