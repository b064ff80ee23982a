// src/vector/mod.rs
// Vector Index Adapter - pluggable similarity search backend
//
// The adapter is the sole owner of similarity ranking; the consistency
// engine never computes similarity itself. Unavailability surfaces as
// IndexUnavailable, distinguished from zero results.

pub mod sqlite;

pub use sqlite::SqliteVectorIndex;

use crate::db::MemoryId;
use crate::error::Result;
use crate::scope::FilterSpec;
use async_trait::async_trait;

/// A ranked similarity hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: MemoryId,
    /// Similarity score in [0, 1], higher is better.
    pub score: f32,
}

/// Capability for embedding storage and nearest-neighbor search.
///
/// `search` applies `scope` so that cross-tenant leakage is impossible even
/// under embedding collisions.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the embedding for a record, tagged with its scope.
    async fn upsert(&self, id: &MemoryId, embedding: &[f32], scope: &FilterSpec) -> Result<()>;

    /// Remove a record's embedding. Removing an absent id is a no-op.
    async fn remove(&self, id: &MemoryId) -> Result<()>;

    /// Ranked nearest neighbors of `embedding` within `scope`.
    async fn search(&self, embedding: &[f32], scope: &FilterSpec, k: usize)
    -> Result<Vec<VectorHit>>;
}

/// Serialize an embedding to sqlite-vec's little-endian float32 blob format.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert cosine distance (0 = identical) to a similarity score in [0, 1].
pub fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_little_endian() {
        let bytes = embedding_to_bytes(&[1.0, -2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.0f32).to_le_bytes());
    }

    #[test]
    fn distance_to_score_bounds() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(2.0), 0.0);
        assert!(distance_to_score(1.0) > 0.49 && distance_to_score(1.0) < 0.51);
        // Out-of-range distances clamp instead of producing nonsense scores
        assert_eq!(distance_to_score(-0.5), 1.0);
        assert_eq!(distance_to_score(3.0), 0.0);
    }
}
