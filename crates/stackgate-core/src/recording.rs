//! Execution recorder: applies state-machine moves to a [`PipelineExecution`]
//! and persists every one of them through an [`ExecutionStore`].

use std::sync::Arc;
use std::time::Instant;

use stackgate_state::{ContentDigest, ExecutionId, ExecutionStore};

use crate::domain::change::DeployOutcome;
use crate::domain::error::{PipelineError, Result};
use crate::domain::execution::{ExecutionState, PipelineExecution, TriggerEvent};
use crate::domain::validation::GateVerdict;
use crate::obs;

/// Owns one in-flight execution and writes it to the store after each change.
///
/// Usage:
/// 1. [`ExecutionRecorder::start`] persists a new `pending` execution.
/// 2. [`ExecutionRecorder::transition`] and the `record_*` methods move it along.
/// 3. A terminal transition (`fail`, `cancel`, or `transition` to a terminal
///    state) emits `execution.finished`; [`ExecutionRecorder::into_execution`]
///    hands back the final snapshot.
pub struct ExecutionRecorder {
    store: Arc<dyn ExecutionStore>,
    execution: PipelineExecution,
    started: Instant,
}

impl ExecutionRecorder {
    /// Create and persist a pending execution for the trigger.
    pub async fn start(store: Arc<dyn ExecutionStore>, trigger: TriggerEvent) -> Result<Self> {
        let execution = PipelineExecution::new(trigger);
        store.save(execution.to_record()?).await?;
        obs::emit_execution_started(
            execution.id().as_str(),
            execution.trigger().kind.as_str(),
            &execution.trigger().source.commit_sha,
        );
        Ok(Self {
            store,
            execution,
            started: Instant::now(),
        })
    }

    pub fn execution_id(&self) -> &ExecutionId {
        self.execution.id()
    }

    pub fn execution(&self) -> &PipelineExecution {
        &self.execution
    }

    pub fn state(&self) -> ExecutionState {
        self.execution.state()
    }

    /// Apply and persist a transition.
    pub async fn transition(&mut self, next: ExecutionState, reason: Option<String>) -> Result<()> {
        let from = self.execution.state();
        self.execution.transition_to(next, reason)?;
        obs::emit_transition(self.execution.id().as_str(), from.as_str(), next.as_str());
        self.persist().await
    }

    /// Terminate as failed with `error` and persist.
    pub async fn fail(&mut self, error: &PipelineError) -> Result<()> {
        let from = self.execution.state();
        self.execution.fail(error)?;
        obs::emit_transition(self.execution.id().as_str(), from.as_str(), "failed");
        self.persist().await
    }

    /// Terminate as cancelled and persist.
    pub async fn cancel(&mut self) -> Result<()> {
        let from = self.execution.state();
        self.execution.cancel()?;
        obs::emit_transition(self.execution.id().as_str(), from.as_str(), "cancelled");
        self.persist().await
    }

    pub async fn record_artifact(&mut self, digest: ContentDigest) -> Result<()> {
        self.execution.record_artifact(digest)?;
        self.persist().await
    }

    pub async fn record_verdict(&mut self, stage: &str, verdict: GateVerdict) -> Result<()> {
        self.execution.record_verdict(stage, verdict)?;
        self.persist().await
    }

    pub async fn record_deployment(&mut self, outcome: DeployOutcome) -> Result<()> {
        self.execution.record_deployment(outcome)?;
        self.persist().await
    }

    /// Consume the recorder, returning the final execution.
    pub fn into_execution(self) -> PipelineExecution {
        self.execution
    }

    async fn persist(&self) -> Result<()> {
        let record = self.execution.to_record()?;
        if let Err(e) = self.store.save(record).await {
            obs::emit_persist_error(self.execution.id().as_str(), &e);
            return Err(e.into());
        }
        if let Some(outcome) = self.execution.outcome() {
            obs::emit_execution_finished(
                self.execution.id().as_str(),
                outcome.as_str(),
                self.started.elapsed().as_millis() as u64,
            );
        }
        Ok(())
    }
}
