// src/graph/sqlite.rs
// SQLite-backed graph store

use super::{Entity, EntityType, GraphStore, Relationship};
use crate::db::{DatabasePool, MemoryId};
use crate::error::{EngramError, Result};
use crate::scope::FilterSpec;
use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

/// Graph projection stored in the graph_entities / graph_relationships
/// tables created by the shared schema.
pub struct SqliteGraphStore {
    pool: Arc<DatabasePool>,
}

impl SqliteGraphStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.pool
            .interact(f)
            .await
            .map_err(|e| EngramError::GraphUnavailable(e.to_string()))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn add_entities(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        entities: &[Entity],
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let origin = origin.as_str().to_string();
        let scope_json = scope.to_json()?;
        let entities = entities.to_vec();

        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO graph_entities (name, canonical_name, entity_type, origin_id, scope) \
                     VALUES (?, ?, ?, ?, ?)",
                )?;
                for entity in &entities {
                    stmt.execute(params![
                        entity.name,
                        entity.canonical_name,
                        entity.entity_type.to_string(),
                        origin,
                        scope_json,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn add_relationships(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        relationships: &[Relationship],
    ) -> Result<()> {
        if relationships.is_empty() {
            return Ok(());
        }
        let origin = origin.as_str().to_string();
        let scope_json = scope.to_json()?;
        let relationships = relationships.to_vec();

        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO graph_relationships (source, target, relation, origin_id, scope) \
                     VALUES (?, ?, ?, ?, ?)",
                )?;
                for rel in &relationships {
                    stmt.execute(params![
                        rel.source,
                        rel.target,
                        rel.relation,
                        origin,
                        scope_json,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_by_origin(&self, origin: &MemoryId) -> Result<()> {
        let origin = origin.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM graph_relationships WHERE origin_id = ?",
                params![origin],
            )?;
            tx.execute(
                "DELETE FROM graph_entities WHERE origin_id = ?",
                params![origin],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_by_scope(&self, scope: &FilterSpec) -> Result<()> {
        let query_scope = scope.clone();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for table in ["graph_relationships", "graph_entities"] {
                // Scope matching is subset-based, so candidate ids are
                // selected in Rust rather than by SQL equality.
                let mut stmt = tx.prepare(&format!("SELECT id, scope FROM {table}"))?;
                let doomed: Vec<i64> = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .filter_map(|r| r.ok())
                    .filter(|(_, scope_json)| {
                        FilterSpec::from_json(scope_json)
                            .map(|s| s.matches(&query_scope))
                            .unwrap_or(false)
                    })
                    .map(|(id, _)| id)
                    .collect();
                drop(stmt);
                for id in doomed {
                    tx.execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn entities_for_origin(&self, origin: &MemoryId) -> Result<Vec<Entity>> {
        let origin = origin.as_str().to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, canonical_name, entity_type FROM graph_entities \
                 WHERE origin_id = ? ORDER BY id",
            )?;
            let entities = stmt
                .query_map(params![origin], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .filter_map(|(name, canonical_name, type_str)| {
                    type_str.parse::<EntityType>().ok().map(|entity_type| Entity {
                        name,
                        canonical_name,
                        entity_type,
                    })
                })
                .collect();
            Ok(entities)
        })
        .await
    }

    async fn relationships_for_origin(&self, origin: &MemoryId) -> Result<Vec<Relationship>> {
        let origin = origin.as_str().to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT source, target, relation FROM graph_relationships \
                 WHERE origin_id = ? ORDER BY id",
            )?;
            let rels = stmt
                .query_map(params![origin], |row| {
                    Ok(Relationship {
                        source: row.get(0)?,
                        target: row.get(1)?,
                        relation: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rels)
        })
        .await
    }
}
