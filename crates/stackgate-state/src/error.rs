//! Error types for stackgate-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::ExecutionStore`] implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record exists for the requested execution id.
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// A terminal record was about to be rewritten.
    #[error("execution {execution_id} is terminal ({outcome}) and cannot be modified")]
    TerminalRecord {
        execution_id: String,
        outcome: String,
    },

    /// A digest string was not 64 hex characters.
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Record body could not be encoded or decoded.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
