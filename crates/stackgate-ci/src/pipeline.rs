//! Pipeline orchestrator: drives executions through the state machine.
//!
//! ```text
//! pending -> sourcing -> testing -> deploying -> succeeded
//!               |           |           |
//!               +--------> failed <-----+
//!
//! pull requests: pending -> sourcing -> testing -> succeeded | failed
//! any non-terminal state -> cancelled
//! ```
//!
//! Every transition is persisted before the next stage starts. The deploying
//! stage holds the environment lock from just before it is entered until the
//! terminal state has been recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackgate_core::{
    obs, CommitStatus, DeploymentCredential, ExecutionRecorder, ExecutionState, GateVerdict,
    PipelineError, PipelineExecution, PipelinePath, Result, TriggerEvent, TriggerKind,
};
use stackgate_state::{ExecutionId, ExecutionQuery, ExecutionStore};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::deploy::DeploymentExecutor;
use crate::gate::GateAggregator;
use crate::lock::{ConflictPolicy, EnvironmentLocks};
use crate::source::SourceProvider;
use crate::spec::ValidatorSpec;
use crate::status::{NoopReporter, StatusReporter};

pub use stackgate_core::TEST_STAGE;

/// Default commit-status context.
pub const DEFAULT_STATUS_CONTEXT: &str = "stackgate";

/// A spawned execution.
pub struct ExecutionHandle {
    pub id: ExecutionId,
    join: JoinHandle<Result<PipelineExecution>>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal state.
    pub async fn wait(self) -> Result<PipelineExecution> {
        self.join
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }
}

/// Orchestrates executions for one repository and one environment.
pub struct Pipeline {
    store: Arc<dyn ExecutionStore>,
    source: Arc<dyn SourceProvider>,
    validators: Vec<ValidatorSpec>,
    executor: DeploymentExecutor,
    credential: DeploymentCredential,
    locks: Arc<EnvironmentLocks>,
    conflict: ConflictPolicy,
    max_wait: Option<Duration>,
    reporter: Arc<dyn StatusReporter>,
    status_context: String,
    running: Mutex<HashMap<ExecutionId, CancelHandle>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        source: Arc<dyn SourceProvider>,
        validators: Vec<ValidatorSpec>,
        executor: DeploymentExecutor,
        credential: DeploymentCredential,
    ) -> Self {
        Self {
            store,
            source,
            validators,
            executor,
            credential,
            locks: Arc::new(EnvironmentLocks::new()),
            conflict: ConflictPolicy::default(),
            max_wait: None,
            reporter: Arc::new(NoopReporter),
            status_context: DEFAULT_STATUS_CONTEXT.to_string(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Share a lock table with other pipelines deploying to the same
    /// environments.
    pub fn with_locks(mut self, locks: Arc<EnvironmentLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_conflict_policy(
        mut self,
        policy: ConflictPolicy,
        max_wait: Option<Duration>,
    ) -> Self {
        self.conflict = policy;
        self.max_wait = max_wait;
        self
    }

    pub fn with_reporter(
        mut self,
        reporter: Arc<dyn StatusReporter>,
        context: impl Into<String>,
    ) -> Self {
        self.reporter = reporter;
        self.status_context = context.into();
        self
    }

    pub fn environment(&self) -> &str {
        self.executor.environment()
    }

    pub fn validators(&self) -> &[ValidatorSpec] {
        &self.validators
    }

    pub fn locks(&self) -> &Arc<EnvironmentLocks> {
        &self.locks
    }

    /// Run an execution to completion on the current task.
    pub async fn run(&self, trigger: TriggerEvent) -> Result<PipelineExecution> {
        let recorder = ExecutionRecorder::start(Arc::clone(&self.store), trigger).await?;
        let token = self.register(recorder.execution_id());
        self.execute(recorder, token).await
    }

    /// Persist a pending execution and drive it on a spawned task.
    ///
    /// The returned id is already cancellable.
    pub async fn start(self: &Arc<Self>, trigger: TriggerEvent) -> Result<ExecutionHandle> {
        let recorder = ExecutionRecorder::start(Arc::clone(&self.store), trigger).await?;
        let id = recorder.execution_id().clone();
        let token = self.register(&id);
        let pipeline = Arc::clone(self);
        let join = tokio::spawn(async move { pipeline.execute(recorder, token).await });
        Ok(ExecutionHandle { id, join })
    }

    /// Request cancellation. `Ok(false)` means the execution had already
    /// finished.
    ///
    /// A non-terminal record with no live task (left behind by a previous
    /// process) is cancelled directly in the store.
    pub async fn cancel(&self, id: &ExecutionId) -> Result<bool> {
        if let Some(handle) = self.lock_running().get(id) {
            info!(execution_id = %id, "cancellation requested");
            handle.cancel();
            return Ok(true);
        }

        let record = self.store.get(id).await?;
        if record.is_terminal() {
            return Ok(false);
        }
        let mut execution = PipelineExecution::from_record(&record)?;
        execution.cancel()?;
        self.store.save(execution.to_record()?).await?;
        warn!(execution_id = %id, "cancelled orphaned execution");
        Ok(true)
    }

    /// Whether this pipeline is currently driving `id`.
    pub fn is_running(&self, id: &ExecutionId) -> bool {
        self.lock_running().contains_key(id)
    }

    pub async fn execution(&self, id: &ExecutionId) -> Result<PipelineExecution> {
        let record = self.store.get(id).await?;
        PipelineExecution::from_record(&record)
    }

    pub async fn list(&self, query: &ExecutionQuery) -> Result<Vec<PipelineExecution>> {
        self.store
            .list(query)
            .await?
            .iter()
            .map(PipelineExecution::from_record)
            .collect()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, CancelHandle>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, id: &ExecutionId) -> CancelToken {
        let (handle, token) = cancel_pair();
        self.lock_running().insert(id.clone(), handle);
        token
    }

    async fn execute(
        &self,
        mut recorder: ExecutionRecorder,
        token: CancelToken,
    ) -> Result<PipelineExecution> {
        let id = recorder.execution_id().clone();
        let _registration = Registration {
            pipeline: self,
            id: id.clone(),
        };

        self.report(recorder.execution()).await;
        self.drive(&mut recorder, &token)
            .instrument(obs::execution_span(id.as_str()))
            .await?;
        self.report(recorder.execution()).await;
        Ok(recorder.into_execution())
    }

    async fn drive(&self, recorder: &mut ExecutionRecorder, token: &CancelToken) -> Result<()> {
        let source = recorder.execution().trigger().source.clone();

        recorder.transition(ExecutionState::Sourcing, None).await?;
        let artifact = match token.run_until_cancelled(self.source.fetch(&source)).await {
            None => return recorder.cancel().await,
            Some(Err(err)) => {
                warn!(error = %err, "artifact fetch failed");
                return recorder.fail(&err).await;
            }
            Some(Ok(artifact)) => artifact,
        };
        recorder.record_artifact(artifact.digest().clone()).await?;

        recorder.transition(ExecutionState::Testing, None).await?;
        let evaluation = GateAggregator::evaluate(&artifact, &self.validators);
        let Some(verdict) = token.run_until_cancelled(evaluation).await else {
            return recorder.cancel().await;
        };
        let failure = validation_failure(&verdict);
        recorder.record_verdict(TEST_STAGE, verdict).await?;
        if let Some(err) = failure {
            return recorder.fail(&err).await;
        }

        if recorder.execution().path() == PipelinePath::Reduced {
            return recorder
                .transition(ExecutionState::Succeeded, Some("validation only".to_string()))
                .await;
        }

        let environment = self.executor.environment().to_string();
        let acquire = self.locks.acquire(&environment, self.conflict, self.max_wait);
        let guard = match token.run_until_cancelled(acquire).await {
            None => return recorder.cancel().await,
            Some(Err(err)) => {
                warn!(environment = %environment, error = %err, "could not enter deploying");
                return recorder.fail(&err).await;
            }
            Some(Ok(guard)) => guard,
        };

        recorder
            .transition(ExecutionState::Deploying, Some(environment))
            .await?;
        let deployment = self.executor.deploy(&artifact, &self.credential);
        let result = match token.run_until_cancelled(deployment).await {
            None => recorder.cancel().await,
            Some(Err(err)) => recorder.fail(&PipelineError::from(err)).await,
            Some(Ok(outcome)) => {
                recorder.record_deployment(outcome).await?;
                recorder.transition(ExecutionState::Succeeded, None).await
            }
        };
        drop(guard);
        result
    }

    /// Push the execution's current status to its pull request. Reporting
    /// failures are logged and never affect the execution.
    async fn report(&self, execution: &PipelineExecution) {
        if execution.trigger().kind != TriggerKind::PullRequest {
            return;
        }
        let status = CommitStatus::for_execution(&self.status_context, execution);
        if let Err(err) = self
            .reporter
            .report(&execution.trigger().source, &status)
            .await
        {
            warn!(
                execution_id = %execution.id(),
                state = ?status.state,
                error = %err,
                "failed to report commit status"
            );
        }
    }
}

/// Removes an execution from the running table when its driver exits.
struct Registration<'a> {
    pipeline: &'a Pipeline,
    id: ExecutionId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pipeline.lock_running().remove(&self.id);
    }
}

fn validation_failure(verdict: &GateVerdict) -> Option<PipelineError> {
    if verdict.passed() {
        return None;
    }
    let names: Vec<&str> = verdict
        .blocking_failures()
        .map(|r| r.validator.as_str())
        .collect();
    Some(PipelineError::ValidationFailure {
        failed: names.len(),
        names: names.join(", "),
    })
}
