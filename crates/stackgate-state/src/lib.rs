//! stackgate-state: durable execution records for stackgate
//!
//! This crate is the persistence layer of the pipeline orchestrator. Every
//! pipeline execution is stored as an [`ExecutionRecord`] keyed by its
//! execution id and queryable by source reference and terminal outcome.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: audit retention and immutability of terminal records.
//!
//! ## Key Components
//!
//! - `ExecutionStore`: backend-agnostic trait
//! - `SurrealExecutionStore`: SurrealDB implementation (memory, local file, remote)
//! - `fakes::MemoryExecutionStore`: in-memory implementation for tests

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{connect_from_env, connect_url, CloudConfig};
pub use storage_traits::{
    ContentDigest, ExecutionId, ExecutionQuery, ExecutionRecord, ExecutionStore, StorageResult,
};
pub use surreal_store::SurrealExecutionStore;

/// Result type for stackgate-state operations
pub type Result<T> = std::result::Result<T, StateError>;
