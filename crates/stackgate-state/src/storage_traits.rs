//! Storage trait definitions for stackgate
//!
//! - `ContentDigest`: SHA-256 identity of an artifact body
//! - `ExecutionStore`: durable pipeline execution records
//!
//! All traits are async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ExecutionStore
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a new random ExecutionId
    pub fn new() -> Self {
        ExecutionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted form of one pipeline execution.
///
/// The indexed columns (`commit_sha`, `branch`, `outcome`, ...) are
/// denormalised from `document`, which holds the complete execution as
/// serialised by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    /// Repository identity (e.g. "org/infra")
    pub repository: String,
    /// Branch the artifact was taken from
    pub branch: String,
    /// Commit the artifact was taken from
    pub commit_sha: String,
    /// Trigger kind ("push", "pull_request", "manual")
    pub trigger: String,
    /// Current state name
    pub state: String,
    /// Terminal outcome ("succeeded", "failed", "cancelled"), absent while running
    pub outcome: Option<String>,
    /// Digest of the artifact body once sourced
    pub artifact_digest: Option<ContentDigest>,
    /// Full execution document
    pub document: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A record with an outcome is terminal and may no longer change.
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Filter for [`ExecutionStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
    pub outcome: Option<String>,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every set filter.
    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.commit_sha
            .as_ref()
            .map(|sha| &record.commit_sha == sha)
            .unwrap_or(true)
            && self
                .branch
                .as_ref()
                .map(|b| &record.branch == b)
                .unwrap_or(true)
            && self
                .outcome
                .as_ref()
                .map(|o| record.outcome.as_ref() == Some(o))
                .unwrap_or(true)
    }
}

/// Durable store of pipeline executions.
///
/// Guarantees:
/// - `save` upserts by execution id.
/// - Once a record has an outcome, further `save` calls for that id fail
///   with `StorageError::TerminalRecord`.
/// - `list` returns records newest first.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or update an execution record.
    async fn save(&self, record: ExecutionRecord) -> StorageResult<()>;

    /// Retrieve a record by execution id.
    async fn get(&self, execution_id: &ExecutionId) -> StorageResult<ExecutionRecord>;

    /// List records matching a query, newest first.
    async fn list(&self, query: &ExecutionQuery) -> StorageResult<Vec<ExecutionRecord>>;
}
