// src/embeddings/hashed.rs
// Deterministic fallback embedder
//
// Hashes word n-grams into a fixed-dimension vector. Not semantically
// meaningful, but deterministic: identical texts embed identically, so
// the vector index stays consistent and searchable without any API key.

use super::Embedder;
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_token(&self, token: &str, vector: &mut [f32]) {
        let digest = Sha256::digest(token.as_bytes());
        // First 8 bytes pick the bucket, next byte picks the sign
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&digest[0..8]);
        let bucket = (u64::from_le_bytes(idx_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &'static str {
        "hashed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens: Vec<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            self.hash_token(token, &mut vector);
        }
        // Bigrams give nearby word order some weight
        for pair in tokens.windows(2) {
            self.hash_token(&format!("{} {}", pair[0], pair[1]), &mut vector);
        }

        // L2-normalize so cosine distance behaves
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            // Empty text still needs a valid unit vector
            vector[0] = 1.0;
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic() {
        let embedder = HashedEmbedder::new(64);
        let a = embedder.embed("alice prefers postgres").await.unwrap();
        let b = embedder.embed("alice prefers postgres").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn normalized_and_dimensioned() {
        let embedder = HashedEmbedder::new(64);
        let v = embedder.embed("some text to embed").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let embedder = HashedEmbedder::new(64);
        let a = embedder.embed("alice prefers postgres").await.unwrap();
        let b = embedder.embed("bob likes skiing").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn shared_words_are_closer_than_disjoint() {
        let embedder = HashedEmbedder::new(256);
        let base = embedder.embed("alice prefers postgres databases").await.unwrap();
        let near = embedder.embed("alice prefers postgres").await.unwrap();
        let far = embedder.embed("completely unrelated skiing trip").await.unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[tokio::test]
    async fn empty_text_is_a_unit_vector() {
        let embedder = HashedEmbedder::new(8);
        let v = embedder.embed("").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
