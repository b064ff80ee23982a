// src/error.rs
// Standardized error types for Engram

use thiserror::Error;

/// Which backend a multi-backend mutation step was talking to when it
/// succeeded or failed. Carried inside [`EngramError::PartialFailure`] so
/// callers can decide whether a retry or manual reconciliation is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MutationStep {
    Record,
    Vector,
    Graph,
    Compensation,
}

/// Main error type for the Engram library
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("scope violation: {0}")]
    ScopeViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("partial failure at {failed} (completed: {})", format_steps(succeeded))]
    PartialFailure {
        /// Steps that were applied before the failure.
        succeeded: Vec<MutationStep>,
        /// The step that failed.
        failed: MutationStep,
        /// The underlying backend error, wrapped, never swallowed.
        #[source]
        source: Box<EngramError>,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn format_steps(steps: &[MutationStep]) -> String {
    if steps.is_empty() {
        return "none".to_string();
    }
    steps
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for Result using EngramError
pub type Result<T> = std::result::Result<T, EngramError>;

impl EngramError {
    /// Convert to user-facing string for MCP tool boundaries
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }

    /// Whether a caller may safely retry the failed operation as-is.
    /// Delete paths are idempotent; add/update are not auto-retryable
    /// after a partial failure (a blind retry could double-create).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngramError::StoreUnavailable(_)
                | EngramError::IndexUnavailable(_)
                | EngramError::GraphUnavailable(_)
        )
    }
}

impl From<String> for EngramError {
    fn from(s: String) -> Self {
        EngramError::Other(s)
    }
}

impl From<tokio::task::JoinError> for EngramError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            EngramError::Cancelled
        } else {
            EngramError::Other(err.to_string())
        }
    }
}

impl From<EngramError> for String {
    fn from(err: EngramError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_violation_error() {
        let err = EngramError::ScopeViolation("user=bob overrides user=alice".to_string());
        assert!(err.to_string().contains("scope violation"));
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_not_found_error() {
        let err = EngramError::NotFound("mem-123".to_string());
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("mem-123"));
    }

    #[test]
    fn test_unknown_operation_error() {
        let err = EngramError::UnknownOperation("frobnicate".to_string());
        assert!(err.to_string().contains("unknown operation"));
    }

    #[test]
    fn test_partial_failure_names_steps() {
        let err = EngramError::PartialFailure {
            succeeded: vec![MutationStep::Record, MutationStep::Vector],
            failed: MutationStep::Graph,
            source: Box::new(EngramError::GraphUnavailable("connection reset".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("graph"));
        assert!(msg.contains("record, vector"));
    }

    #[test]
    fn test_partial_failure_empty_succeeded() {
        let err = EngramError::PartialFailure {
            succeeded: vec![],
            failed: MutationStep::Record,
            source: Box::new(EngramError::StoreUnavailable("locked".to_string())),
        };
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngramError::StoreUnavailable("down".to_string()).is_retryable());
        assert!(EngramError::IndexUnavailable("down".to_string()).is_retryable());
        assert!(!EngramError::NotFound("x".to_string()).is_retryable());
        assert!(
            !EngramError::PartialFailure {
                succeeded: vec![MutationStep::Record],
                failed: MutationStep::Vector,
                source: Box::new(EngramError::IndexUnavailable("down".to_string())),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_from_string() {
        let err: EngramError = "some error".to_string().into();
        assert!(matches!(err, EngramError::Other(_)));
    }

    #[test]
    fn test_into_string() {
        let err = EngramError::Embedding("dimension mismatch".to_string());
        let s: String = err.into();
        assert!(s.contains("embedding error"));
    }

    #[test]
    fn test_to_user_string() {
        let err = EngramError::InvalidArgument("k must be positive".to_string());
        assert_eq!(err.to_user_string(), err.to_string());
    }

    #[test]
    fn test_mutation_step_display() {
        assert_eq!(MutationStep::Record.to_string(), "record");
        assert_eq!(MutationStep::Vector.to_string(), "vector");
        assert_eq!(MutationStep::Graph.to_string(), "graph");
    }
}
