//! SurrealDB row mapping for execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{ContentDigest, ExecutionId, ExecutionRecord, StorageResult};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in the `executions` table.
///
/// `document` is stored as JSON text so the execution body round-trips
/// byte-for-byte regardless of SurrealDB value coercion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbExecution {
    pub execution_id: String,
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
    pub trigger: String,
    pub state: String,
    pub outcome: Option<String>,
    pub artifact_digest: Option<String>,
    pub document: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DbExecution {
    pub fn from_record(record: &ExecutionRecord) -> StorageResult<Self> {
        Ok(Self {
            execution_id: record.execution_id.0.clone(),
            repository: record.repository.clone(),
            branch: record.branch.clone(),
            commit_sha: record.commit_sha.clone(),
            trigger: record.trigger.clone(),
            state: record.state.clone(),
            outcome: record.outcome.clone(),
            artifact_digest: record
                .artifact_digest
                .as_ref()
                .map(|d| d.as_str().to_string()),
            document: serde_json::to_string(&record.document)?,
            created_at: record.created_at,
            updated_at: record.updated_at,
            finished_at: record.finished_at,
        })
    }

    pub fn into_record(self) -> StorageResult<ExecutionRecord> {
        let document = serde_json::from_str(&self.document)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(ExecutionRecord {
            execution_id: ExecutionId(self.execution_id),
            repository: self.repository,
            branch: self.branch,
            commit_sha: self.commit_sha,
            trigger: self.trigger,
            state: self.state,
            outcome: self.outcome,
            artifact_digest: self.artifact_digest.map(ContentDigest::try_from).transpose()?,
            document,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        })
    }
}
