//! Error types for the task store.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Task document not found.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task document with the same id already exists.
    #[error("task already exists: {0}")]
    AlreadyExists(String),

    /// The stored version no longer matches the caller's copy.
    #[error("version conflict on task {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("down".to_string()).is_transient());
        assert!(!StoreError::NotFound("1".to_string()).is_transient());
        assert!(!StoreError::AlreadyExists("1".to_string()).is_transient());
        assert!(
            !StoreError::VersionConflict {
                id: "1".to_string(),
                expected: 1,
                actual: 2
            }
            .is_transient()
        );
    }

    #[test]
    fn test_version_conflict_display() {
        let err = StoreError::VersionConflict {
            id: "task-1".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "version conflict on task task-1: expected 3, found 4"
        );
    }
}
