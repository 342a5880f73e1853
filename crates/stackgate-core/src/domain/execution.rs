//! Pipeline executions and the state machine that governs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackgate_state::{ContentDigest, ExecutionId, ExecutionRecord};

use super::artifact::SourceRef;
use super::change::DeployOutcome;
use super::error::{PipelineError, Result};
use super::validation::GateVerdict;

/// Stage name under which the gate verdict is recorded.
pub const TEST_STAGE: &str = "testing";

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Sourcing,
    Testing,
    Deploying,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Sourcing => "sourcing",
            ExecutionState::Testing => "testing",
            ExecutionState::Deploying => "deploying",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal move on the given path.
    pub fn can_transition_to(&self, next: ExecutionState, path: PipelinePath) -> bool {
        use ExecutionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Pending, Sourcing) => true,
            (Sourcing, Testing) | (Sourcing, Failed) => true,
            (Testing, Failed) => true,
            (Testing, Deploying) => path == PipelinePath::Full,
            (Testing, Succeeded) => path == PipelinePath::Reduced,
            (Deploying, Succeeded) | (Deploying, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }

    fn from_state(state: ExecutionState) -> Option<Self> {
        match state {
            ExecutionState::Succeeded => Some(Outcome::Succeeded),
            ExecutionState::Failed => Some(Outcome::Failed),
            ExecutionState::Cancelled => Some(Outcome::Cancelled),
            _ => None,
        }
    }
}

/// Which stage sequence an execution follows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePath {
    /// Source, test, deploy.
    Full,
    /// Source and test only; the verdict is reported back to the change.
    Reduced,
}

/// What started an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Commit pushed to the integration branch.
    Push,
    /// Pull request opened or updated against the base branch.
    PullRequest,
    /// Operator-requested run of a specific commit.
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Manual => "manual",
        }
    }

    pub fn path(&self) -> PipelinePath {
        match self {
            TriggerKind::PullRequest => PipelinePath::Reduced,
            TriggerKind::Push | TriggerKind::Manual => PipelinePath::Full,
        }
    }
}

/// A normalized change event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub source: SourceRef,
    /// Pull request number, for pull-request triggers.
    #[serde(default)]
    pub pull_request: Option<u64>,
    /// Delivery id supplied by the source-control host, when present.
    #[serde(default)]
    pub delivery_id: Option<String>,
}

impl TriggerEvent {
    pub fn push(source: SourceRef) -> Self {
        Self {
            kind: TriggerKind::Push,
            source,
            pull_request: None,
            delivery_id: None,
        }
    }

    pub fn pull_request(source: SourceRef, number: u64) -> Self {
        Self {
            kind: TriggerKind::PullRequest,
            source,
            pull_request: Some(number),
            delivery_id: None,
        }
    }

    pub fn manual(source: SourceRef) -> Self {
        Self {
            kind: TriggerKind::Manual,
            source,
            pull_request: None,
            delivery_id: None,
        }
    }

    pub fn with_delivery_id(mut self, id: impl Into<String>) -> Self {
        self.delivery_id = Some(id.into());
        self
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Gate verdict produced for a named stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageVerdict {
    pub stage: String,
    pub verdict: GateVerdict,
}

/// One run of the pipeline for one trigger.
///
/// Fields are only reachable through accessors; every mutation goes through
/// [`PipelineExecution::transition_to`] or one of the `record_*` methods, all
/// of which refuse to touch a terminal execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineExecution {
    id: ExecutionId,
    trigger: TriggerEvent,
    artifact_digest: Option<ContentDigest>,
    state: ExecutionState,
    verdicts: Vec<StageVerdict>,
    deployment: Option<DeployOutcome>,
    outcome: Option<Outcome>,
    error: Option<String>,
    transitions: Vec<Transition>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    /// Create a pending execution for a trigger.
    pub fn new(trigger: TriggerEvent) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            trigger,
            artifact_digest: None,
            state: ExecutionState::Pending,
            verdicts: Vec::new(),
            deployment: None,
            outcome: None,
            error: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn path(&self) -> PipelinePath {
        self.trigger.kind.path()
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn artifact_digest(&self) -> Option<&ContentDigest> {
        self.artifact_digest.as_ref()
    }

    pub fn verdicts(&self) -> &[StageVerdict] {
        &self.verdicts
    }

    pub fn verdict(&self, stage: &str) -> Option<&GateVerdict> {
        self.verdicts
            .iter()
            .find(|v| v.stage == stage)
            .map(|v| &v.verdict)
    }

    pub fn deployment(&self) -> Option<&DeployOutcome> {
        self.deployment.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether this execution ever entered the deploying state.
    pub fn attempted_deploy(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| t.to == ExecutionState::Deploying)
    }

    /// Whether the most recent test-stage verdict passed.
    pub fn gate_passed(&self) -> bool {
        self.verdicts
            .iter()
            .rev()
            .find(|v| v.stage == TEST_STAGE)
            .is_some_and(|v| v.verdict.passed())
    }

    /// Move to `next`, recording the transition.
    ///
    /// Deploying additionally requires a passing test-stage verdict.
    pub fn transition_to(&mut self, next: ExecutionState, reason: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(next, self.path()) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == ExecutionState::Deploying && !self.gate_passed() {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            at: now,
            reason,
        });
        self.state = next;
        self.updated_at = now;
        if let Some(outcome) = Outcome::from_state(next) {
            self.outcome = Some(outcome);
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Terminate as failed, keeping the error message on the record.
    pub fn fail(&mut self, error: &PipelineError) -> Result<()> {
        self.ensure_open()?;
        let message = error.to_string();
        self.transition_to(ExecutionState::Failed, Some(message.clone()))?;
        self.error = Some(message);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition_to(ExecutionState::Cancelled, Some("cancelled".to_string()))?;
        self.error = Some(PipelineError::Cancelled.to_string());
        Ok(())
    }

    pub fn record_artifact(&mut self, digest: ContentDigest) -> Result<()> {
        self.ensure_open()?;
        self.artifact_digest = Some(digest);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_verdict(&mut self, stage: impl Into<String>, verdict: GateVerdict) -> Result<()> {
        self.ensure_open()?;
        self.verdicts.push(StageVerdict {
            stage: stage.into(),
            verdict,
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_deployment(&mut self, outcome: DeployOutcome) -> Result<()> {
        self.ensure_open()?;
        self.deployment = Some(outcome);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Flatten into the storage representation.
    pub fn to_record(&self) -> Result<ExecutionRecord> {
        Ok(ExecutionRecord {
            execution_id: self.id.clone(),
            repository: self.trigger.source.repository.clone(),
            branch: self.trigger.source.branch.clone(),
            commit_sha: self.trigger.source.commit_sha.clone(),
            trigger: self.trigger.kind.as_str().to_string(),
            state: self.state.as_str().to_string(),
            outcome: self.outcome.map(|o| o.as_str().to_string()),
            artifact_digest: self.artifact_digest.clone(),
            document: serde_json::to_value(self)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        })
    }

    /// Rebuild from a stored record.
    pub fn from_record(record: &ExecutionRecord) -> Result<Self> {
        Ok(serde_json::from_value(record.document.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::{FailurePolicy, ValidationResult, ValidationStatus};

    fn source() -> SourceRef {
        SourceRef::new("org/infra", "main", "abc123")
    }

    fn verdict(status: ValidationStatus) -> GateVerdict {
        GateVerdict::from_results(vec![ValidationResult::new(
            "lint",
            FailurePolicy::Blocking,
            status,
        )])
    }

    fn walk(exec: &mut PipelineExecution, states: &[ExecutionState]) {
        for s in states {
            exec.transition_to(*s, None).unwrap();
        }
    }

    #[test]
    fn test_full_path_reaches_succeeded() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
        walk(&mut exec, &[Sourcing, Testing]);
        exec.record_verdict(TEST_STAGE, verdict(ValidationStatus::Pass))
            .unwrap();
        walk(&mut exec, &[Deploying, Succeeded]);
        assert_eq!(exec.outcome(), Some(Outcome::Succeeded));
        assert!(exec.finished_at().is_some());
        assert_eq!(exec.transitions().len(), 4);
        assert!(exec.attempted_deploy());
    }

    #[test]
    fn test_reduced_path_cannot_deploy() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::pull_request(source(), 7));
        walk(&mut exec, &[Sourcing, Testing]);
        let err = exec.transition_to(Deploying, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        exec.transition_to(Succeeded, None).unwrap();
        assert!(!exec.attempted_deploy());
    }

    #[test]
    fn test_deploying_requires_passing_gate() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
        walk(&mut exec, &[Sourcing, Testing]);
        let err = exec.transition_to(Deploying, None).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition: testing -> deploying");

        exec.record_verdict(TEST_STAGE, verdict(ValidationStatus::Fail))
            .unwrap();
        assert!(exec.transition_to(Deploying, None).is_err());
        assert_eq!(exec.state(), Testing);
        assert!(!exec.attempted_deploy());

        // A verdict under another stage name does not open the gate.
        exec.record_verdict("lint-only", verdict(ValidationStatus::Pass))
            .unwrap();
        assert!(exec.transition_to(Deploying, None).is_err());

        exec.record_verdict(TEST_STAGE, verdict(ValidationStatus::Pass))
            .unwrap();
        exec.transition_to(Deploying, None).unwrap();
        assert!(exec.attempted_deploy());
    }

    #[test]
    fn test_full_path_cannot_skip_deploy() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::manual(source()));
        walk(&mut exec, &[Sourcing, Testing]);
        assert!(exec.transition_to(Succeeded, None).is_err());
    }

    #[test]
    fn test_terminal_is_immutable() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
        walk(&mut exec, &[Sourcing, Testing]);
        exec.fail(&PipelineError::ValidationFailure {
            failed: 1,
            names: "lint".to_string(),
        })
        .unwrap();
        assert_eq!(exec.outcome(), Some(Outcome::Failed));
        assert!(exec.error().unwrap().contains("lint"));

        assert!(exec.transition_to(Cancelled, None).is_err());
        assert!(exec
            .record_verdict("testing", GateVerdict::from_results(vec![]))
            .is_err());
        assert!(exec.cancel().is_err());
    }

    #[test]
    fn test_sourcing_failure_is_legal() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
        walk(&mut exec, &[Sourcing]);
        exec.fail(&PipelineError::Source("no such commit".to_string()))
            .unwrap();
        assert_eq!(exec.state(), Failed);
    }

    #[test]
    fn test_pending_cannot_jump_to_testing() {
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
        let err = exec
            .transition_to(ExecutionState::Testing, None)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid transition: pending -> testing");
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        use ExecutionState::*;
        for prefix in [&[][..], &[Sourcing][..], &[Sourcing, Testing][..]] {
            let mut exec = PipelineExecution::new(TriggerEvent::push(source()));
            walk(&mut exec, prefix);
            exec.cancel().unwrap();
            assert_eq!(exec.outcome(), Some(Outcome::Cancelled));
        }
    }

    #[test]
    fn test_record_round_trip() {
        use ExecutionState::*;
        let mut exec = PipelineExecution::new(TriggerEvent::push(source()).with_delivery_id("d-1"));
        walk(&mut exec, &[Sourcing]);
        exec.record_artifact(ContentDigest::from_bytes(b"body"))
            .unwrap();
        walk(&mut exec, &[Testing]);
        exec.record_verdict(
            "testing",
            GateVerdict::from_results(vec![ValidationResult::new(
                "lint",
                FailurePolicy::Blocking,
                ValidationStatus::Pass,
            )]),
        )
        .unwrap();

        let record = exec.to_record().unwrap();
        assert_eq!(record.state, "testing");
        assert_eq!(record.trigger, "push");
        assert!(record.outcome.is_none());

        let restored = PipelineExecution::from_record(&record).unwrap();
        assert_eq!(restored, exec);
        assert!(restored.verdict("testing").unwrap().passed());
    }
}
