// src/vector/sqlite.rs
// sqlite-vec backed vector index

use super::{VectorHit, VectorIndex, distance_to_score, embedding_to_bytes};
use crate::db::{DatabasePool, MemoryId};
use crate::error::{EngramError, Result};
use crate::scope::FilterSpec;
use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

/// How many raw neighbors to fetch per requested hit. Scope filtering
/// happens after ranking, so the candidate set is over-fetched to keep
/// recall high for tenants sharing an index with many others.
const OVERFETCH_FACTOR: usize = 4;
const MIN_CANDIDATES: usize = 64;

/// Vector index stored in a sqlite-vec vec0 virtual table.
///
/// Owns its table: the embedding dimension is fixed at construction, so
/// the table is created here rather than in the shared schema.
pub struct SqliteVectorIndex {
    pool: Arc<DatabasePool>,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Create the index, ensuring the vec0 table exists with the right
    /// dimension count.
    pub async fn new(pool: Arc<DatabasePool>, dimensions: usize) -> Result<Self> {
        let ddl = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_memory USING vec0(\
             embedding float[{dimensions}], \
             +memory_id TEXT, \
             +scope TEXT)"
        );
        pool.interact(move |conn| {
            conn.execute_batch(&ddl)?;
            Ok(())
        })
        .await
        .map_err(|e| EngramError::IndexUnavailable(e.to_string()))?;

        Ok(Self { pool, dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(EngramError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, id: &MemoryId, embedding: &[f32], scope: &FilterSpec) -> Result<()> {
        self.check_dimensions(embedding)?;
        let memory_id = id.as_str().to_string();
        let bytes = embedding_to_bytes(embedding);
        let scope_json = scope.to_json()?;

        self.pool
            .interact(move |conn| {
                // vec0 has no ON CONFLICT; delete-then-insert is the upsert
                conn.execute(
                    "DELETE FROM vec_memory WHERE memory_id = ?",
                    params![memory_id],
                )?;
                conn.execute(
                    "INSERT INTO vec_memory (embedding, memory_id, scope) VALUES (?, ?, ?)",
                    params![bytes, memory_id, scope_json],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| EngramError::IndexUnavailable(e.to_string()))
    }

    async fn remove(&self, id: &MemoryId) -> Result<()> {
        let memory_id = id.as_str().to_string();
        self.pool
            .interact(move |conn| {
                conn.execute(
                    "DELETE FROM vec_memory WHERE memory_id = ?",
                    params![memory_id],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| EngramError::IndexUnavailable(e.to_string()))
    }

    async fn search(
        &self,
        embedding: &[f32],
        scope: &FilterSpec,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        self.check_dimensions(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let bytes = embedding_to_bytes(embedding);
        let candidates = (k * OVERFETCH_FACTOR).max(MIN_CANDIDATES);
        let query_scope = scope.clone();

        let raw: Vec<(String, String, f32)> = self
            .pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT memory_id, scope, vec_distance_cosine(embedding, ?1) AS distance \
                     FROM vec_memory \
                     ORDER BY distance \
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![bytes, candidates as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| EngramError::IndexUnavailable(e.to_string()))?;

        // Scope post-filter: a hit outside the caller's scope never leaves
        // the adapter, regardless of how close its embedding is.
        let hits = raw
            .into_iter()
            .filter(|(_, scope_json, _)| {
                FilterSpec::from_json(scope_json)
                    .map(|s| s.matches(&query_scope))
                    .unwrap_or(false)
            })
            .take(k)
            .map(|(id, _, distance)| VectorHit {
                id: MemoryId::from(id),
                score: distance_to_score(distance),
            })
            .collect();

        Ok(hits)
    }
}
