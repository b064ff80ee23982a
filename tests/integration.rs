// tests/integration.rs
// End-to-end behavior through the engine and tool layer

use async_trait::async_trait;
use engram::FilterSpec;
use engram::db::{DatabasePool, MemoryId, RecordStore};
use engram::embeddings::HashedEmbedder;
use engram::engine::ConsistencyEngine;
use engram::error::{EngramError, MutationStep, Result};
use engram::graph::{Entity, GraphStore, Relationship, SqliteGraphStore};
use engram::vector::SqliteVectorIndex;
use futures::TryStreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const DIMS: usize = 64;

async fn engine() -> ConsistencyEngine {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    let records = RecordStore::new(pool.clone());
    let vector = Arc::new(SqliteVectorIndex::new(pool.clone(), DIMS).await.unwrap());
    let graph = Arc::new(SqliteGraphStore::new(pool));
    ConsistencyEngine::new(records, vector, graph, Arc::new(HashedEmbedder::new(DIMS)))
}

fn scope(pairs: &[(&str, &str)]) -> FilterSpec {
    FilterSpec::from_pairs(pairs.iter().copied())
}

/// Graph double that can be switched into a failing state mid-test.
struct FlakyGraph {
    inner: SqliteGraphStore,
    broken: AtomicBool,
}

impl FlakyGraph {
    fn new(pool: Arc<DatabasePool>) -> Self {
        Self {
            inner: SqliteGraphStore::new(pool),
            broken: AtomicBool::new(false),
        }
    }

    fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(EngramError::GraphUnavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GraphStore for FlakyGraph {
    async fn add_entities(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        entities: &[Entity],
    ) -> Result<()> {
        self.check()?;
        self.inner.add_entities(origin, scope, entities).await
    }
    async fn add_relationships(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        relationships: &[Relationship],
    ) -> Result<()> {
        self.check()?;
        self.inner
            .add_relationships(origin, scope, relationships)
            .await
    }
    async fn delete_by_origin(&self, origin: &MemoryId) -> Result<()> {
        self.inner.delete_by_origin(origin).await
    }
    async fn delete_by_scope(&self, scope: &FilterSpec) -> Result<()> {
        self.inner.delete_by_scope(scope).await
    }
    async fn entities_for_origin(&self, origin: &MemoryId) -> Result<Vec<Entity>> {
        self.inner.entities_for_origin(origin).await
    }
    async fn relationships_for_origin(&self, origin: &MemoryId) -> Result<Vec<Relationship>> {
        self.inner.relationships_for_origin(origin).await
    }
}

#[tokio::test]
async fn coffee_shop_scenario() {
    // The canonical walkthrough: alice remembers a preference, bob sees
    // nothing, a scoped wipe clears alice but not bob.
    let engine = engine().await;
    let alice = scope(&[("user", "alice")]);
    let bob = scope(&[("user", "bob")]);

    let record = engine
        .add_memory("I prefer quiet coffee shops", &alice)
        .await
        .unwrap();

    let alice_hits = engine
        .search_memory("quiet coffee preferences", &alice, 10)
        .await
        .unwrap();
    assert_eq!(alice_hits.len(), 1);
    assert_eq!(alice_hits[0].id, record.id);
    assert!(alice_hits[0].score > 0.0);

    let bob_hits = engine
        .search_memory("quiet coffee preferences", &bob, 10)
        .await
        .unwrap();
    assert!(bob_hits.is_empty());

    engine.add_memory("bob's skiing trip", &bob).await.unwrap();

    let deleted = engine.delete_all(&alice).await.unwrap();
    assert_eq!(deleted, 1);

    let alice_left: Vec<_> = engine
        .list_memories(alice)
        .try_collect()
        .await
        .unwrap();
    assert!(alice_left.is_empty());

    let bob_left: Vec<_> = engine.list_memories(bob).try_collect().await.unwrap();
    assert_eq!(bob_left.len(), 1);
    assert_eq!(bob_left[0].text, "bob's skiing trip");
}

#[tokio::test]
async fn round_trip_preserves_text_exactly() {
    let engine = engine().await;
    let s = scope(&[("user", "alice"), ("agent", "coder"), ("run", "r42")]);
    let text = "Läufer prefers tabs — always `hard tabs`, width 4.";

    let record = engine.add_memory(text, &s).await.unwrap();
    let fetched = engine.get_memory(&record.id, &s).await.unwrap();
    assert_eq!(fetched.text, text);

    let listed: Vec<_> = engine.list_memories(s).try_collect().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].text, text);
}

#[tokio::test]
async fn search_scope_is_subset_matched() {
    let engine = engine().await;
    let full = scope(&[("user", "alice"), ("agent", "coder"), ("run", "r1")]);
    engine.add_memory("scoped note", &full).await.unwrap();

    // Any subset of the stored dimensions finds it
    for query in [
        scope(&[("user", "alice")]),
        scope(&[("agent", "coder")]),
        scope(&[("user", "alice"), ("run", "r1")]),
        FilterSpec::new(),
    ] {
        let hits = engine.search_memory("scoped note", &query, 10).await.unwrap();
        assert_eq!(hits.len(), 1, "query {query} should match");
    }

    // A differing or extra dimension does not
    for query in [
        scope(&[("user", "bob")]),
        scope(&[("user", "alice"), ("run", "r2")]),
        scope(&[("team", "infra")]),
    ] {
        let hits = engine.search_memory("scoped note", &query, 10).await.unwrap();
        assert!(hits.is_empty(), "query {query} should not match");
    }
}

#[tokio::test]
async fn delete_memory_idempotence_is_visible_in_listing() {
    let engine = engine().await;
    let alice = scope(&[("user", "alice")]);
    let record = engine.add_memory("short-lived", &alice).await.unwrap();

    assert!(engine.delete_memory(&record.id, &alice).await.unwrap());
    assert!(!engine.delete_memory(&record.id, &alice).await.unwrap());

    let listed: Vec<_> = engine
        .list_memories(alice.clone())
        .try_collect()
        .await
        .unwrap();
    assert!(listed.is_empty());
    let hits = engine.search_memory("short-lived", &alice, 10).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn failed_graph_write_leaves_no_visible_record() {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    let records = RecordStore::new(pool.clone());
    let vector = Arc::new(SqliteVectorIndex::new(pool.clone(), DIMS).await.unwrap());
    let graph = Arc::new(FlakyGraph::new(pool));
    let engine = ConsistencyEngine::new(
        records,
        vector,
        graph.clone(),
        Arc::new(HashedEmbedder::new(DIMS)),
    );
    let alice = scope(&[("user", "alice")]);

    // A healthy write first, to prove later state is untouched
    let kept = engine.add_memory("healthy memory", &alice).await.unwrap();

    graph.break_writes();
    let err = engine
        .add_memory("Alice works at Conary Labs", &alice)
        .await
        .unwrap_err();
    match err {
        EngramError::PartialFailure {
            succeeded, failed, ..
        } => {
            assert_eq!(succeeded, vec![MutationStep::Record, MutationStep::Vector]);
            assert_eq!(failed, MutationStep::Graph);
        }
        other => panic!("expected PartialFailure, got {other}"),
    }

    // Compensation: the failed record is neither listed nor searchable
    let listed: Vec<_> = engine
        .list_memories(alice.clone())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, kept.id);

    let hits = engine
        .search_memory("Conary Labs", &alice, 10)
        .await
        .unwrap();
    assert!(!hits.iter().any(|h| h.text.contains("Conary")));
}

#[tokio::test]
async fn delete_all_cutoff_spares_concurrent_adds() {
    let engine = Arc::new(engine().await);
    let alice = scope(&[("user", "alice")]);

    for i in 0..5 {
        engine
            .add_memory(&format!("old memory {i}"), &alice)
            .await
            .unwrap();
    }

    // Start the wipe and a racing add; whatever the interleaving, the
    // outcome is one of two linearizable states and old records are gone.
    let wipe = {
        let engine = engine.clone();
        let alice = alice.clone();
        tokio::spawn(async move { engine.delete_all(&alice).await })
    };
    let add = {
        let engine = engine.clone();
        let alice = alice.clone();
        tokio::spawn(async move { engine.add_memory("racing memory", &alice).await })
    };

    let deleted = wipe.await.unwrap().unwrap();
    let racer = add.await.unwrap().unwrap();
    assert!(deleted >= 5);

    let left: Vec<_> = engine
        .list_memories(alice)
        .try_collect()
        .await
        .unwrap();
    for record in &left {
        assert_eq!(record.id, racer.id, "only the racer may survive");
    }
    assert!(left.len() <= 1);
}

#[tokio::test]
async fn graph_projection_follows_record_lifecycle() {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    let records = RecordStore::new(pool.clone());
    let vector = Arc::new(SqliteVectorIndex::new(pool.clone(), DIMS).await.unwrap());
    let graph = Arc::new(SqliteGraphStore::new(pool.clone()));
    let engine = ConsistencyEngine::new(
        records,
        vector,
        graph.clone(),
        Arc::new(HashedEmbedder::new(DIMS)),
    );
    let alice = scope(&[("user", "alice")]);

    let v1 = engine
        .add_memory("Alice works at Conary Labs", &alice)
        .await
        .unwrap();
    assert!(!graph.entities_for_origin(&v1.id).await.unwrap().is_empty());

    // Update moves the projection to the new origin
    let v2 = engine
        .update_memory(&v1.id, "Alice moved to Berlin", &alice)
        .await
        .unwrap();
    assert!(graph.entities_for_origin(&v1.id).await.unwrap().is_empty());
    let v2_entities = graph.entities_for_origin(&v2.id).await.unwrap();
    assert!(v2_entities.iter().any(|e| e.canonical_name == "berlin"));

    // Delete removes it entirely
    engine.delete_memory(&v2.id, &alice).await.unwrap();
    assert!(graph.entities_for_origin(&v2.id).await.unwrap().is_empty());
    assert!(
        graph
            .relationships_for_origin(&v2.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn many_sessions_interleave_safely() {
    let engine = Arc::new(engine().await);

    let mut handles = Vec::new();
    for session in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", session % 4);
            let s = FilterSpec::from_pairs([("user", user.as_str())]);
            for i in 0..5 {
                let record = engine
                    .add_memory(&format!("note {session}-{i}"), &s)
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    engine.delete_memory(&record.id, &s).await.unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Each user sees only their own survivors: 8 sessions x 5 adds, 3 of 5
    // deleted, two sessions per user
    for user in 0..4 {
        let s = FilterSpec::from_pairs([("user", format!("user-{user}"))]);
        let listed: Vec<_> = engine
            .list_memories(s.clone())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(listed.len(), 4);
        for record in &listed {
            assert_eq!(record.scope.get("user"), Some(format!("user-{user}").as_str()));
        }
    }
}
