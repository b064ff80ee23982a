// src/scope.rs
// Filter Spec - multi-dimensional scoping predicate/tag
//
// A FilterSpec is used identically as a tag attached to records and graph
// rows at write time, and as a predicate at read/delete time. Dimensions
// absent from a query are wildcards. Once attached to a record the spec is
// immutable; scope changes happen through new mutations, never in place.

use crate::error::{EngramError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Multi-dimensional scope: named dimensions (user, agent, run, app, ...)
/// mapped to string values. Any subset of dimensions may be present.
///
/// BTreeMap keeps serialization stable, so stored scope JSON is comparable
/// across writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(transparent)]
pub struct FilterSpec {
    dims: BTreeMap<String, String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a spec from (dimension, value) pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            dims: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn get(&self, dim: &str) -> Option<&str> {
        self.dims.get(dim).map(String::as_str)
    }

    pub fn insert(&mut self, dim: impl Into<String>, value: impl Into<String>) {
        self.dims.insert(dim.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dims.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True iff every dimension present in `query` exists in `self` with an
    /// equal value. Dimensions missing from the query are wildcards, so an
    /// empty query matches everything.
    pub fn matches(&self, query: &FilterSpec) -> bool {
        query
            .dims
            .iter()
            .all(|(k, v)| self.dims.get(k) == Some(v))
    }

    /// Merge a caller-supplied partial spec with mandatory server-injected
    /// dimensions. Server dimensions always win; a caller dimension that
    /// would override a server dimension with a different value is rejected
    /// (prevents a client impersonating another scope). Restating a server
    /// dimension with the identical value overrides nothing and is allowed.
    pub fn merge(server: &FilterSpec, caller: &FilterSpec) -> Result<FilterSpec> {
        let mut merged = server.clone();
        for (dim, value) in &caller.dims {
            match server.dims.get(dim) {
                Some(existing) if existing != value => {
                    return Err(EngramError::ScopeViolation(format!(
                        "dimension '{dim}' is server-controlled ('{existing}'), caller sent '{value}'"
                    )));
                }
                Some(_) => {}
                None => {
                    merged.dims.insert(dim.clone(), value.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Serialize for storage in a scope column.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.dims)?)
    }

    /// Parse a stored scope column.
    pub fn from_json(json: &str) -> Result<FilterSpec> {
        Ok(FilterSpec {
            dims: serde_json::from_str(json)?,
        })
    }
}

impl std::fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dims.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        for (i, (k, v)) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pairs: &[(&str, &str)]) -> FilterSpec {
        FilterSpec::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn empty_query_matches_everything() {
        let candidate = spec(&[("user", "alice"), ("agent", "coder")]);
        assert!(candidate.matches(&FilterSpec::new()));
        assert!(FilterSpec::new().matches(&FilterSpec::new()));
    }

    #[test]
    fn subset_query_matches() {
        let candidate = spec(&[("user", "alice"), ("agent", "coder"), ("run", "r1")]);
        assert!(candidate.matches(&spec(&[("user", "alice")])));
        assert!(candidate.matches(&spec(&[("user", "alice"), ("run", "r1")])));
    }

    #[test]
    fn differing_value_does_not_match() {
        let candidate = spec(&[("user", "alice")]);
        assert!(!candidate.matches(&spec(&[("user", "bob")])));
    }

    #[test]
    fn query_dim_missing_from_candidate_does_not_match() {
        let candidate = spec(&[("user", "alice")]);
        assert!(!candidate.matches(&spec(&[("user", "alice"), ("agent", "coder")])));
    }

    #[test]
    fn empty_candidate_only_matches_empty_query() {
        let candidate = FilterSpec::new();
        assert!(candidate.matches(&FilterSpec::new()));
        assert!(!candidate.matches(&spec(&[("user", "alice")])));
    }

    #[test]
    fn merge_adds_caller_dims() {
        let server = spec(&[("user", "alice")]);
        let caller = spec(&[("agent", "coder"), ("run", "r7")]);
        let merged = FilterSpec::merge(&server, &caller).unwrap();
        assert_eq!(merged.get("user"), Some("alice"));
        assert_eq!(merged.get("agent"), Some("coder"));
        assert_eq!(merged.get("run"), Some("r7"));
    }

    #[test]
    fn merge_rejects_override_of_server_dim() {
        let server = spec(&[("user", "alice")]);
        let caller = spec(&[("user", "bob")]);
        let err = FilterSpec::merge(&server, &caller).unwrap_err();
        assert!(matches!(err, EngramError::ScopeViolation(_)));
    }

    #[test]
    fn merge_allows_identical_restatement() {
        let server = spec(&[("user", "alice")]);
        let caller = spec(&[("user", "alice"), ("agent", "coder")]);
        let merged = FilterSpec::merge(&server, &caller).unwrap();
        assert_eq!(merged.get("user"), Some("alice"));
        assert_eq!(merged.get("agent"), Some("coder"));
    }

    #[test]
    fn json_round_trip() {
        let original = spec(&[("user", "alice"), ("agent", "coder")]);
        let json = original.to_json().unwrap();
        let parsed = FilterSpec::from_json(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn json_is_stable_across_insertion_order() {
        let a = spec(&[("user", "alice"), ("agent", "coder")]);
        let b = spec(&[("agent", "coder"), ("user", "alice")]);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(FilterSpec::new().to_string(), "{}");
        assert_eq!(spec(&[("user", "alice")]).to_string(), "{user=alice}");
    }
}
