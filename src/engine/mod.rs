// src/engine/mod.rs
// Consistency Engine - keeps record store, vector index, and graph agreeing
//
// Every mutation runs the same pipeline: record first, vector second, graph
// third. A failure after the record write triggers compensation (the record
// is marked deleted) so an active record is always search-reachable or does
// not exist. Multi-backend failures surface as PartialFailure naming the
// steps that succeeded.

pub mod locks;

use crate::db::{MemoryId, MemoryRecord, RecordState, RecordStore};
use crate::embeddings::Embedder;
use crate::error::{EngramError, MutationStep, Result};
use crate::extract;
use crate::graph::GraphStore;
use crate::scope::FilterSpec;
use crate::vector::VectorIndex;
use chrono::Utc;
use futures::stream::Stream;
use locks::ChainLocks;
use std::sync::Arc;
use tracing::{debug, warn};

/// A ranked search result resolved against the record store.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: MemoryId,
    pub text: String,
    pub score: f32,
}

/// Orchestrates add/search/update/delete across the three backends.
pub struct ConsistencyEngine {
    records: RecordStore,
    vector: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    locks: ChainLocks,
}

impl ConsistencyEngine {
    pub fn new(
        records: RecordStore,
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            records,
            vector,
            graph,
            embedder,
            locks: ChainLocks::new(),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Store a memory in all three backends.
    ///
    /// Pipeline: record -> vector -> graph. If a later step fails the new
    /// record is marked deleted, so no active record exists without index
    /// presence. Not retried internally: a blind retry after PartialFailure
    /// could double-create, so retry is the caller's decision.
    pub async fn add_memory(&self, text: &str, scope: &FilterSpec) -> Result<MemoryRecord> {
        let text = validate_text(text)?;

        let record = self.records.create(text.to_string(), scope.clone()).await?;
        debug!(id = %record.id, scope = %scope, "record created");

        if let Err(e) = self.apply_vector(&record).await {
            self.compensate_add(&record, false).await;
            return Err(partial(vec![MutationStep::Record], MutationStep::Vector, e));
        }

        if let Err(e) = self.apply_graph(&record).await {
            self.compensate_add(&record, true).await;
            return Err(partial(
                vec![MutationStep::Record, MutationStep::Vector],
                MutationStep::Graph,
                e,
            ));
        }

        Ok(record)
    }

    /// Ranked search within `scope`.
    ///
    /// The vector index owns similarity ranking; hits are then resolved
    /// against the record store and any id that no longer names an active
    /// record is discarded. That defends against the window between a
    /// record-state change and the matching index update.
    pub async fn search_memory(
        &self,
        query: &str,
        scope: &FilterSpec,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = validate_text(query)?;
        let embedding = self.embedder.embed(query).await?;
        let hits = self.vector.search(&embedding, scope, k).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.records.get(&hit.id).await? {
                Some(record) if record.state == RecordState::Active => {
                    results.push(SearchHit {
                        id: record.id,
                        text: record.text,
                        score: hit.score,
                    });
                }
                Some(_) | None => {
                    debug!(id = %hit.id, "discarding stale index hit");
                }
            }
        }
        Ok(results)
    }

    /// Active records in `scope`, most-recent-first, lazily paged.
    pub fn list_memories(&self, scope: FilterSpec) -> impl Stream<Item = Result<MemoryRecord>> + use<> {
        self.records.query(scope)
    }

    /// Fetch one active record, enforcing scope.
    pub async fn get_memory(&self, id: &MemoryId, scope: &FilterSpec) -> Result<MemoryRecord> {
        let record = self
            .records
            .get(id)
            .await?
            .filter(|r| r.state == RecordState::Active)
            .ok_or_else(|| EngramError::NotFound(format!("no active record with id {id}")))?;
        check_scope(&record, scope)?;
        Ok(record)
    }

    /// Replace a memory's text, superseding the old version.
    ///
    /// Linearized per identity chain: concurrent update/delete on the same
    /// logical memory take turns. The replacement runs the add pipeline; the
    /// superseded version's index and graph presence is removed alongside.
    pub async fn update_memory(
        &self,
        id: &MemoryId,
        new_text: &str,
        scope: &FilterSpec,
    ) -> Result<MemoryRecord> {
        let new_text = validate_text(new_text)?;

        let existing = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| EngramError::NotFound(format!("no record with id {id}")))?;
        check_scope(&existing, scope)?;

        let _guard = self.locks.acquire(existing.root_id.as_str()).await;

        let replacement = self.records.supersede(id, new_text.to_string()).await?;
        debug!(old = %id, new = %replacement.id, "record superseded");

        let vector_step = async {
            self.apply_vector(&replacement).await?;
            self.vector.remove(id).await
        };
        if let Err(e) = vector_step.await {
            self.compensate_add(&replacement, false).await;
            return Err(partial(vec![MutationStep::Record], MutationStep::Vector, e));
        }

        let graph_step = async {
            self.graph.delete_by_origin(id).await?;
            self.apply_graph(&replacement).await
        };
        if let Err(e) = graph_step.await {
            self.compensate_add(&replacement, true).await;
            return Err(partial(
                vec![MutationStep::Record, MutationStep::Vector],
                MutationStep::Graph,
                e,
            ));
        }

        Ok(replacement)
    }

    /// Delete one memory, enforcing scope. Idempotent: deleting an
    /// already-deleted record returns Ok(false).
    pub async fn delete_memory(&self, id: &MemoryId, scope: &FilterSpec) -> Result<bool> {
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| EngramError::NotFound(format!("no record with id {id}")))?;
        check_scope(&record, scope)?;

        let _guard = self.locks.acquire(record.root_id.as_str()).await;

        // Re-read under the lock; a concurrent delete may have won
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| EngramError::NotFound(format!("no record with id {id}")))?;
        if record.state == RecordState::Deleted {
            return Ok(false);
        }

        self.vector
            .remove(id)
            .await
            .map_err(|e| partial(vec![], MutationStep::Vector, e))?;
        self.graph
            .delete_by_origin(id)
            .await
            .map_err(|e| partial(vec![MutationStep::Vector], MutationStep::Graph, e))?;
        self.records.mark_deleted(id).await.map_err(|e| {
            partial(
                vec![MutationStep::Vector, MutationStep::Graph],
                MutationStep::Record,
                e,
            )
        })?;

        Ok(true)
    }

    /// Delete every memory matching `scope`. Returns the count deleted.
    ///
    /// A cutoff is snapshotted up front; records created after the cutoff
    /// survive the wipe. This is the one path allowed to use scope-wide
    /// graph deletion.
    ///
    /// An add whose record commits before the cutoff but whose index/graph
    /// writes land after the removals below leaves those writes behind a
    /// non-active record. Reads filter on record state, so the residue is
    /// never visible; `purge` reclaims it.
    pub async fn delete_all(&self, scope: &FilterSpec) -> Result<usize> {
        let cutoff = Utc::now();
        let victims = self
            .records
            .active_in_scope_at(scope.clone(), cutoff)
            .await?;
        debug!(scope = %scope, count = victims.len(), "bulk delete started");

        for victim in &victims {
            self.vector
                .remove(&victim.id)
                .await
                .map_err(|e| partial(vec![], MutationStep::Vector, e))?;
        }

        self.graph
            .delete_by_scope(scope)
            .await
            .map_err(|e| partial(vec![MutationStep::Vector], MutationStep::Graph, e))?;

        let mut deleted = 0;
        for victim in &victims {
            if self.records.mark_deleted(&victim.id).await.map_err(|e| {
                partial(
                    vec![MutationStep::Vector, MutationStep::Graph],
                    MutationStep::Record,
                    e,
                )
            })? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Physically remove superseded/deleted records matching `scope`.
    /// The only operation that ever drops record rows.
    ///
    /// Index and graph rows still attached to those records are swept
    /// first: a wipe that raced an in-flight add can leave an embedding or
    /// graph rows behind a non-active record, and this is where that
    /// residue is reclaimed.
    pub async fn purge(&self, scope: &FilterSpec) -> Result<usize> {
        let residue = self.records.non_active_in_scope(scope.clone()).await?;
        for id in &residue {
            self.vector.remove(id).await?;
            self.graph.delete_by_origin(id).await?;
        }
        self.records.purge(scope.clone()).await
    }

    async fn apply_vector(&self, record: &MemoryRecord) -> Result<()> {
        let embedding = self.embedder.embed(&record.text).await?;
        self.vector
            .upsert(&record.id, &embedding, &record.scope)
            .await
    }

    async fn apply_graph(&self, record: &MemoryRecord) -> Result<()> {
        let extraction = extract::extract(&record.text);
        self.graph
            .add_entities(&record.id, &record.scope, &extraction.entities)
            .await?;
        self.graph
            .add_relationships(&record.id, &record.scope, &extraction.relationships)
            .await
    }

    /// Best-effort rollback of a failed add/update: strip whatever was
    /// already written and mark the record deleted. Compensation failures
    /// are logged, not returned; the caller already gets a PartialFailure
    /// for the original step.
    async fn compensate_add(&self, record: &MemoryRecord, vector_written: bool) {
        if vector_written {
            if let Err(e) = self.vector.remove(&record.id).await {
                warn!(id = %record.id, error = %e, "compensation: vector remove failed");
            }
        }
        // Graph writes are per-origin transactional, but a partial batch
        // may exist when add_entities succeeded and add_relationships did
        // not.
        if let Err(e) = self.graph.delete_by_origin(&record.id).await {
            warn!(id = %record.id, error = %e, "compensation: graph cleanup failed");
        }
        match self.records.mark_deleted(&record.id).await {
            Ok(_) => debug!(id = %record.id, "compensated: record marked deleted"),
            Err(e) => warn!(id = %record.id, error = %e, "compensation: mark deleted failed"),
        }
    }
}

fn validate_text(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngramError::InvalidArgument(
            "text must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

fn check_scope(record: &MemoryRecord, caller: &FilterSpec) -> Result<()> {
    if !record.scope.matches(caller) {
        return Err(EngramError::ScopeViolation(format!(
            "record {} is outside caller scope {caller}",
            record.id
        )));
    }
    Ok(())
}

fn partial(succeeded: Vec<MutationStep>, failed: MutationStep, source: EngramError) -> EngramError {
    // A nested PartialFailure would obscure the original step; unwrap it
    let source = match source {
        EngramError::PartialFailure { source, .. } => *source,
        other => other,
    };
    EngramError::PartialFailure {
        succeeded,
        failed,
        source: Box::new(source),
    }
}
