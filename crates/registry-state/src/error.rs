//! Error types for registry-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Invalid connection configuration
    #[error("Invalid store configuration: {0}")]
    Config(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by store and execution-ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The identifier (or page token) is not in the canonical ID format
    #[error("invalid id: {value:?}")]
    InvalidId { value: String },

    /// No record of this kind has the given ID
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The backing store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within its deadline
    #[error("{operation} exceeded deadline of {timeout_ms}ms")]
    DeadlineExceeded {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Missing or malformed argument (page size, filter field, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An execution was not in the status the transition expected
    #[error("execution {id} cannot move from {actual} to {to} (expected {expected})")]
    InvalidTransition {
        id: String,
        expected: String,
        actual: String,
        to: String,
    },

    /// The requested move goes backwards or leaves a terminal status
    #[error("execution {id}: illegal transition from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Any other backend failure (query, decode)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Transient errors that a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::DeadlineExceeded { .. }
        )
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("connection") || lowered.contains("not connected") {
            StorageError::Unavailable(message)
        } else {
            StorageError::Backend(message)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(format!("serialization failed: {err}"))
    }
}
