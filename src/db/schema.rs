// src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Run all schema setup and migrations.
///
/// Called during database initialization. Idempotent - every statement
/// checks for existing tables/indexes before creating.
///
/// The vec_memory virtual table is not created here: its dimension count
/// belongs to the vector index adapter, which ensures its own table on
/// construction (see `vector::sqlite`).
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- MEMORY RECORDS
-- =======================================
-- One row per record version. root_id names the identity chain: the first
-- record in a chain has root_id = id, and supersede carries root_id forward.
-- At most one row per chain is 'active'. Superseded/deleted rows are kept
-- for history and removed only by explicit purge.
CREATE TABLE IF NOT EXISTS memory_records (
    id TEXT PRIMARY KEY,
    root_id TEXT NOT NULL,
    text TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT '{}',      -- FilterSpec JSON, immutable once written
    state TEXT NOT NULL DEFAULT 'active',  -- 'active' | 'superseded' | 'deleted'
    superseded_by TEXT REFERENCES memory_records(id),
    created_at INTEGER NOT NULL,           -- microseconds since epoch, UTC
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_state_created ON memory_records(state, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_records_root ON memory_records(root_id);

-- =======================================
-- ENTITY / RELATIONSHIP GRAPH
-- =======================================
-- Every row is traceable to exactly one originating memory record.
CREATE TABLE IF NOT EXISTS graph_entities (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    origin_id TEXT NOT NULL REFERENCES memory_records(id),
    scope TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_entities_origin ON graph_entities(origin_id);
CREATE INDEX IF NOT EXISTS idx_entities_canonical ON graph_entities(canonical_name);

CREATE TABLE IF NOT EXISTS graph_relationships (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,                  -- canonical name of source entity
    target TEXT NOT NULL,                  -- canonical name of target entity
    relation TEXT NOT NULL,
    origin_id TEXT NOT NULL REFERENCES memory_records(id),
    scope TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_relationships_origin ON graph_relationships(origin_id);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON graph_relationships(source);
"#;
