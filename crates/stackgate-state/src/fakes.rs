//! In-memory fake for the storage trait (testing only)
//!
//! Provides `MemoryExecutionStore`, which satisfies the `ExecutionStore`
//! contract without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory execution store backed by a `HashMap<execution_id, record>`.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    records: Mutex<HashMap<String, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save(&self, record: ExecutionRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(record.execution_id.as_str()) {
            if let Some(outcome) = &existing.outcome {
                return Err(StorageError::TerminalRecord {
                    execution_id: record.execution_id.0.clone(),
                    outcome: outcome.clone(),
                });
            }
        }
        records.insert(record.execution_id.0.clone(), record);
        Ok(())
    }

    async fn get(&self, execution_id: &ExecutionId) -> StorageResult<ExecutionRecord> {
        let records = self.records.lock().unwrap();
        records
            .get(execution_id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            })
    }

    async fn list(&self, query: &ExecutionQuery) -> StorageResult<Vec<ExecutionRecord>> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
