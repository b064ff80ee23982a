// src/extract.rs
// Heuristic entity/relationship extraction from memory text
//
// Extracts people, organizations, places, and technologies from
// conversational memory content using precompiled regexes, plus the
// relationship patterns connecting them. Deterministic and fast; no model
// calls.

use crate::graph::{Entity, EntityType, Relationship, canonicalize};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Extraction output for one memory text.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

// Precompiled regexes via LazyLock — compiled once, used many times

/// Capitalized name runs: one or two capitalized words, not sentence-initial
/// filler. Candidate people/places/orgs; classified afterwards.
#[allow(clippy::expect_used)]
static PROPER_NOUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b").expect("valid regex")
});

/// Organization suffixes: "Acme Corp", "Conary Labs", "Widgets Inc"
#[allow(clippy::expect_used)]
static ORG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*\s+(?:Inc|Corp|Labs|Ltd|LLC|GmbH))\b")
        .expect("valid regex")
});

/// "works at X" / "joined X" / "employed by X"
#[allow(clippy::expect_used)]
static WORKS_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+)\s+(?:works? at|joined|is employed by)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)")
        .expect("valid regex")
});

/// "lives in X" / "moved to X" / "based in X"
#[allow(clippy::expect_used)]
static LIVES_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+)\s+(?:lives? in|moved to|is based in)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)")
        .expect("valid regex")
});

/// "uses X" / "prefers X" / "likes X" with a capitalized or backtick object
#[allow(clippy::expect_used)]
static USES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+)\s+(uses?|prefers?|likes?)\s+([A-Za-z][\w+#.-]*)")
        .expect("valid regex")
});

/// Backtick code/technology references
#[allow(clippy::expect_used)]
static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]{2,})`").expect("valid regex"));

/// Well-known technology names worth tagging even without backticks.
static TECH_NAMES: &[&str] = &[
    "rust",
    "python",
    "javascript",
    "typescript",
    "postgresql",
    "postgres",
    "sqlite",
    "mysql",
    "redis",
    "kafka",
    "docker",
    "kubernetes",
    "linux",
    "react",
    "tokio",
    "grpc",
];

/// Sentence-initial words and pronouns that look like proper nouns but are
/// not entities.
static STOPWORDS: &[&str] = &[
    "the", "this", "that", "these", "those", "a", "an", "i", "he", "she", "it", "we", "they",
    "my", "his", "her", "its", "our", "their", "when", "where", "what", "who", "how", "why",
    "yes", "no", "ok", "also", "but", "and", "or", "if", "then", "after", "before", "today",
    "tomorrow", "yesterday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday",
];

fn is_stopword(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOPWORDS.contains(&lower.as_str())
}

fn is_tech(word: &str) -> bool {
    let lower = word.to_lowercase();
    TECH_NAMES.contains(&lower.as_str())
}

/// Extract entities and relationships from memory text.
///
/// Dedup is by (canonical_name, entity_type) for entities and by the full
/// triple for relationships. Classification order matters: relationship
/// patterns classify their operands (person/org/place) before the generic
/// proper-noun pass falls back to `Topic`.
pub fn extract(text: &str) -> Extraction {
    let mut seen_entities: HashSet<(String, &'static str)> = HashSet::new();
    let mut seen_rels: HashSet<(String, String, String)> = HashSet::new();
    let mut out = Extraction::default();

    let mut push_entity = |out: &mut Extraction, name: &str, entity_type: EntityType| {
        let entity = Entity::new(name, entity_type);
        let key = (entity.canonical_name.clone(), entity_type.into());
        if seen_entities.insert(key) {
            out.entities.push(entity);
        }
    };
    let mut push_rel = |out: &mut Extraction, source: &str, relation: &str, target: &str| {
        let rel = Relationship {
            source: canonicalize(source),
            target: canonicalize(target),
            relation: relation.to_string(),
        };
        let key = (rel.source.clone(), rel.relation.clone(), rel.target.clone());
        if seen_rels.insert(key) {
            out.relationships.push(rel);
        }
    };

    // 1. Relationship patterns: classify operands as a side effect
    for cap in WORKS_AT_RE.captures_iter(text) {
        let (person, org) = (&cap[1], &cap[2]);
        if is_stopword(person) {
            continue;
        }
        push_entity(&mut out, person, EntityType::Person);
        push_entity(&mut out, org, EntityType::Organization);
        push_rel(&mut out, person, "works_at", org);
    }
    for cap in LIVES_IN_RE.captures_iter(text) {
        let (person, place) = (&cap[1], &cap[2]);
        if is_stopword(person) {
            continue;
        }
        push_entity(&mut out, person, EntityType::Person);
        push_entity(&mut out, place, EntityType::Place);
        push_rel(&mut out, person, "lives_in", place);
    }
    for cap in USES_RE.captures_iter(text) {
        let (person, verb, object) = (&cap[1], &cap[2], &cap[3]);
        if is_stopword(person) || is_stopword(object) {
            continue;
        }
        let relation = if verb.starts_with("use") {
            "uses"
        } else if verb.starts_with("prefer") {
            "prefers"
        } else {
            "likes"
        };
        push_entity(&mut out, person, EntityType::Person);
        let object_type = if is_tech(object) {
            EntityType::Technology
        } else {
            EntityType::Topic
        };
        push_entity(&mut out, object, object_type);
        push_rel(&mut out, person, relation, object);
    }

    // 2. Organizations by suffix
    for cap in ORG_RE.captures_iter(text) {
        push_entity(&mut out, &cap[1], EntityType::Organization);
    }

    // 3. Backtick references are technologies
    for cap in BACKTICK_RE.captures_iter(text) {
        push_entity(&mut out, &cap[1], EntityType::Technology);
    }

    // 4. Remaining proper nouns: tech list, else single-word person,
    //    multi-word topic
    for cap in PROPER_NOUN_RE.captures_iter(text) {
        let name = &cap[1];
        if is_stopword(name.split_whitespace().next().unwrap_or(name)) {
            continue;
        }
        let entity_type = if is_tech(name) {
            EntityType::Technology
        } else if name.contains(' ') {
            EntityType::Topic
        } else {
            EntityType::Person
        };
        push_entity(&mut out, name, entity_type);
    }

    out
}
