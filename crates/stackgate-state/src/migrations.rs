//! SurrealDB schema initialization
//!
//! Sets up the `executions` table with its indexes. Safe to call on every
//! connection (DEFINE statements are idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all stackgate tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing stackgate SurrealDB schema");
    init_executions_table(db).await?;
    Ok(())
}

/// Initialize `executions` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE executions {
///   execution_id:     STRING (unique)
///   repository:       STRING
///   branch:           STRING (indexed)
///   commit_sha:       STRING (indexed)
///   trigger:          STRING
///   state:            STRING
///   outcome:          STRING? (indexed; succeeded | failed | cancelled)
///   artifact_digest:  STRING?
///   document:         STRING (JSON)
///   created_at:       DATETIME (indexed)
///   updated_at:       DATETIME
///   finished_at:      DATETIME?
/// }
/// ```
///
/// Records with an outcome are immutable (enforced via app logic).
/// Deletion is never permitted: records are retained for audit.
async fn init_executions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing executions table");

    let sql = r#"
        DEFINE TABLE executions AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_execution_id ON TABLE executions COLUMNS execution_id UNIQUE;
        DEFINE INDEX idx_commit_sha ON TABLE executions COLUMNS commit_sha;
        DEFINE INDEX idx_branch ON TABLE executions COLUMNS branch;
        DEFINE INDEX idx_outcome ON TABLE executions COLUMNS outcome;
        DEFINE INDEX idx_created_at ON TABLE executions COLUMNS created_at;
    "#;

    db.query(sql).await?;
    info!("executions table initialized");
    Ok(())
}
