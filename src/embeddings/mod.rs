// src/embeddings/mod.rs
// Embedding provider module

mod hashed;
mod openai;

pub use self::hashed::HashedEmbedder;
pub use self::openai::{OpenAiEmbedder, OpenAiEmbeddingModel};

use crate::config::EngramConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Capability for turning memory text into a fixed-dimension embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension count; every returned vector has this length.
    fn dimensions(&self) -> usize;

    /// Provider identifier for logging.
    fn provider_id(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Build the embedder from configuration: OpenAI when an API key is
/// present, otherwise the deterministic hashed fallback so the index stays
/// writable offline.
pub fn from_config(config: &EngramConfig) -> Arc<dyn Embedder> {
    match &config.openai_api_key {
        Some(key) => {
            tracing::info!(dimensions = config.embedding_dimensions, "using openai embeddings");
            Arc::new(OpenAiEmbedder::new(
                key.clone(),
                OpenAiEmbeddingModel::default(),
                Some(config.embedding_dimensions),
            ))
        }
        None => {
            tracing::info!(
                dimensions = config.embedding_dimensions,
                "no OPENAI_API_KEY, using hashed embeddings"
            );
            Arc::new(HashedEmbedder::new(config.embedding_dimensions))
        }
    }
}
