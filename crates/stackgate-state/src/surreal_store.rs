//! SurrealDB-backed ExecutionStore implementation
//!
//! Uses `schema::DbExecution` for persistence, converting to/from
//! `storage_traits::ExecutionRecord` at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::StorageError;
use crate::handle;
use crate::schema::DbExecution;
use crate::storage_traits::{
    ExecutionId, ExecutionQuery, ExecutionRecord, ExecutionStore, StorageResult,
};

/// SurrealDB-backed implementation of [`ExecutionStore`].
#[derive(Clone)]
pub struct SurrealExecutionStore {
    db: Surreal<Any>,
}

impl SurrealExecutionStore {
    /// Wrap an already-initialized connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_url("mem://").await?;
        Ok(Self { db })
    }

    /// Create from environment variables (see [`handle::connect_from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        let db = handle::connect_from_env().await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch(&self, eid: &str) -> StorageResult<Option<DbExecution>> {
        let eid_owned = eid.to_string();
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM executions WHERE execution_id = $eid")
            .bind(("eid", eid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbExecution> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ExecutionStore for SurrealExecutionStore {
    async fn save(&self, record: ExecutionRecord) -> StorageResult<()> {
        let row = DbExecution::from_record(&record)?;
        let eid = record.execution_id.0.clone();

        match self.fetch(&eid).await? {
            Some(existing) => {
                if let Some(outcome) = existing.outcome {
                    return Err(StorageError::TerminalRecord {
                        execution_id: eid,
                        outcome,
                    });
                }
                debug!(execution_id = %eid, state = %row.state, "updating execution");
                self.db
                    .query("UPDATE executions CONTENT $row WHERE execution_id = $eid")
                    .bind(("row", row))
                    .bind(("eid", eid))
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
            None => {
                debug!(execution_id = %eid, "creating execution");
                let _created: Option<DbExecution> = self
                    .db
                    .create("executions")
                    .content(row)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn get(&self, execution_id: &ExecutionId) -> StorageResult<ExecutionRecord> {
        self.fetch(execution_id.as_str())
            .await?
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            })?
            .into_record()
    }

    async fn list(&self, query: &ExecutionQuery) -> StorageResult<Vec<ExecutionRecord>> {
        let mut clauses = Vec::new();
        if query.commit_sha.is_some() {
            clauses.push("commit_sha = $sha");
        }
        if query.branch.is_some() {
            clauses.push("branch = $branch");
        }
        if query.outcome.is_some() {
            clauses.push("outcome = $outcome");
        }

        let mut sql = String::from("SELECT * OMIT id FROM executions");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut pending = self.db.query(sql);
        if let Some(sha) = &query.commit_sha {
            pending = pending.bind(("sha", sha.clone()));
        }
        if let Some(branch) = &query.branch {
            pending = pending.bind(("branch", branch.clone()));
        }
        if let Some(outcome) = &query.outcome {
            pending = pending.bind(("outcome", outcome.clone()));
        }

        let mut res = pending
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<DbExecution> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(DbExecution::into_record).collect()
    }
}
