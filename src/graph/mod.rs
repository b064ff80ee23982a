// src/graph/mod.rs
// Graph Store Adapter - entity/relationship projection of memories
//
// Every graph row is traceable to exactly one originating memory record,
// so record deletion can cascade precisely. Unavailability surfaces as
// GraphUnavailable, distinct from StoreUnavailable and IndexUnavailable.

pub mod sqlite;

pub use sqlite::SqliteGraphStore;

use crate::db::MemoryId;
use crate::error::Result;
use crate::scope::FilterSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An entity extracted from memory text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface form as it appeared in the text.
    pub name: String,
    /// Lowercased, trimmed form used for joins and dedup.
    pub canonical_name: String,
    pub entity_type: EntityType,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let name = name.into();
        let canonical_name = canonicalize(&name);
        Self {
            name,
            canonical_name,
            entity_type,
        }
    }
}

/// Coarse entity categories produced by extraction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Place,
    Technology,
    Topic,
}

/// A directed relationship between two entities, named by canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Canonical form for entity names: trimmed, lowercased, inner whitespace
/// collapsed.
pub fn canonicalize(name: &str) -> String {
    name.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Capability for storing and removing the graph projection of a record.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Store entities for a record. Replaces nothing; callers remove the old
    /// origin's rows first when re-projecting.
    async fn add_entities(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        entities: &[Entity],
    ) -> Result<()>;

    /// Store relationships for a record.
    async fn add_relationships(
        &self,
        origin: &MemoryId,
        scope: &FilterSpec,
        relationships: &[Relationship],
    ) -> Result<()>;

    /// Remove every graph row originating from `origin`. Idempotent.
    async fn delete_by_origin(&self, origin: &MemoryId) -> Result<()>;

    /// Remove every graph row whose scope matches `scope`.
    async fn delete_by_scope(&self, scope: &FilterSpec) -> Result<()>;

    /// Entities originating from a record, for enriching read results.
    async fn entities_for_origin(&self, origin: &MemoryId) -> Result<Vec<Entity>>;

    /// Relationships originating from a record.
    async fn relationships_for_origin(&self, origin: &MemoryId) -> Result<Vec<Relationship>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_normalizes() {
        assert_eq!(canonicalize("  San   Francisco "), "san francisco");
        assert_eq!(canonicalize("PostgreSQL"), "postgresql");
    }

    #[test]
    fn entity_new_derives_canonical() {
        let e = Entity::new("Alice Chen", EntityType::Person);
        assert_eq!(e.name, "Alice Chen");
        assert_eq!(e.canonical_name, "alice chen");
    }

    #[test]
    fn entity_type_strings() {
        assert_eq!(EntityType::Person.to_string(), "person");
        assert_eq!(
            "technology".parse::<EntityType>().unwrap(),
            EntityType::Technology
        );
    }
}
