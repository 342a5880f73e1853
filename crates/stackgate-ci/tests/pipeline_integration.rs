//! Integration tests for the pipeline with in-memory store, source and target.

use std::sync::Arc;
use std::time::Duration;

use stackgate_ci::deploy::{DeploymentExecutor, ExecutorSettings};
use stackgate_ci::fakes::{MemoryTarget, RecordingReporter, StaticSource};
use stackgate_ci::{ConflictPolicy, EnvironmentLocks, Pipeline, ValidatorSpec};
use stackgate_core::{
    ChangeStatus, DeployedResource, DeploymentCredential, ExecutionRecorder, ExecutionState, Grant,
    Outcome, PipelineExecution, ResourceAction, SourceRef, TriggerEvent, ValidationStatus,
    VerdictStatus,
};
use stackgate_state::fakes::MemoryExecutionStore;
use stackgate_state::{ExecutionId, ExecutionQuery, ExecutionStore, SurrealExecutionStore};

const TEMPLATE: &str = "\
Resources:
  Logs:
    Type: AWS::S3::Bucket
  Jobs:
    Type: AWS::SQS::Queue
";

fn sh(name: &str, script: &str) -> ValidatorSpec {
    ValidatorSpec::command(
        name,
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "validator".to_string(),
        ],
    )
}

fn grant_all() -> DeploymentCredential {
    DeploymentCredential::new(
        "deployer",
        vec![Grant::new(
            vec![
                ResourceAction::Create,
                ResourceAction::Update,
                ResourceAction::Delete,
            ],
            vec!["*".to_string()],
        )],
    )
}

fn fast_settings() -> ExecutorSettings {
    ExecutorSettings {
        poll_interval: Duration::from_millis(10),
        ceiling: Duration::from_secs(5),
    }
}

struct Harness {
    store: Arc<dyn ExecutionStore>,
    target: Arc<MemoryTarget>,
    pipeline: Arc<Pipeline>,
}

fn harness_with(
    store: Arc<dyn ExecutionStore>,
    validators: Vec<ValidatorSpec>,
    target: MemoryTarget,
    credential: DeploymentCredential,
    settings: ExecutorSettings,
    policy: ConflictPolicy,
) -> Harness {
    let target = Arc::new(target);
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(StaticSource::new("infra/stack.yaml", TEMPLATE)),
        validators,
        DeploymentExecutor::new(target.clone(), settings),
        credential,
    )
    .with_conflict_policy(policy, None);
    Harness {
        store,
        target,
        pipeline: Arc::new(pipeline),
    }
}

fn harness(validators: Vec<ValidatorSpec>, target: MemoryTarget) -> Harness {
    harness_with(
        Arc::new(MemoryExecutionStore::new()),
        validators,
        target,
        grant_all(),
        fast_settings(),
        ConflictPolicy::Queue,
    )
}

fn push(sha: &str) -> TriggerEvent {
    TriggerEvent::push(SourceRef::new("org/infra", "main", sha))
}

async fn wait_for_state(pipeline: &Pipeline, id: &ExecutionId, state: ExecutionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let exec = pipeline.execution(id).await.expect("execution stored");
        if exec.state() == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution never reached {state}, stuck in {}",
            exec.state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn states(exec: &PipelineExecution) -> Vec<ExecutionState> {
    exec.transitions().iter().map(|t| t.to).collect()
}

/// Scenario A: all blocking validators pass, the executor runs exactly once.
#[tokio::test]
async fn test_passing_gate_deploys_once() {
    let h = harness(
        vec![sh("lint", "exit 0"), sh("scan", "exit 0")],
        MemoryTarget::new("production"),
    );

    let exec = h.pipeline.run(push("a1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Succeeded));
    assert_eq!(
        states(&exec),
        vec![
            ExecutionState::Sourcing,
            ExecutionState::Testing,
            ExecutionState::Deploying,
            ExecutionState::Succeeded,
        ]
    );
    assert_eq!(h.target.deploy_invocations(), 1);
    assert_eq!(h.target.apply_count(), 2);
    assert_eq!(exec.deployment().expect("deployment recorded").applied.len(), 2);

    let stored = h.store.get(exec.id()).await.expect("record persisted");
    assert_eq!(stored.outcome.as_deref(), Some("succeeded"));
    assert_eq!(
        stored.artifact_digest.as_ref(),
        exec.artifact_digest(),
        "digest column matches the document"
    );
}

/// Scenario B: one blocking failure outweighs two passing advisory validators.
#[tokio::test]
async fn test_blocking_failure_never_deploys() {
    let h = harness(
        vec![
            sh("lint", "echo 'E3012 bad type' >&2; exit 1"),
            sh("style", "exit 0").advisory(),
            sh("cost", "exit 0").advisory(),
        ],
        MemoryTarget::new("production"),
    );

    let exec = h.pipeline.run(push("b1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Failed));
    let verdict = exec.verdict("testing").expect("verdict recorded");
    assert_eq!(verdict.status, VerdictStatus::Fail);
    assert_eq!(verdict.results.len(), 3, "all results retained");
    assert_eq!(verdict.results[0].status, ValidationStatus::Fail);
    assert!(!exec.attempted_deploy());
    assert_eq!(h.target.deploy_invocations(), 0);
    assert!(exec.error().expect("error recorded").contains("lint"));
}

/// Scenario C: missing teardown permission fails before any mutation.
#[tokio::test]
async fn test_missing_delete_permission_fails_closed() {
    let credential = DeploymentCredential::new(
        "deployer",
        vec![Grant::new(
            vec![ResourceAction::Create, ResourceAction::Update],
            vec!["*".to_string()],
        )],
    );
    let h = harness_with(
        Arc::new(MemoryExecutionStore::new()),
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production"),
        credential,
        fast_settings(),
        ConflictPolicy::Queue,
    );

    let exec = h.pipeline.run(push("c1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Failed));
    assert!(exec.attempted_deploy());
    assert_eq!(h.target.apply_count(), 0, "nothing applied");
    let error = exec.error().expect("error recorded");
    assert!(error.contains("permission insufficient"), "{error}");
    assert!(error.contains("delete AWS::S3::Bucket"), "{error}");
    assert!(error.contains("delete AWS::SQS::Queue"), "{error}");
}

/// Scenario D (reject): a second push while the first is deploying is
/// rejected with a conflict; the first finishes undisturbed.
#[tokio::test]
async fn test_second_push_rejected_while_deploying() {
    let h = harness_with(
        Arc::new(MemoryExecutionStore::new()),
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production").with_apply_delay(Duration::from_millis(300)),
        grant_all(),
        fast_settings(),
        ConflictPolicy::Reject,
    );

    let first = h.pipeline.start(push("d1")).await.expect("started");
    wait_for_state(&h.pipeline, &first.id, ExecutionState::Deploying).await;

    let second = h.pipeline.run(push("d2")).await.expect("pipeline ran");
    assert_eq!(second.outcome(), Some(Outcome::Failed));
    assert!(!second.attempted_deploy());
    assert!(second
        .error()
        .expect("error recorded")
        .contains("concurrent deployment conflict"));

    let first = first.wait().await.expect("first finished");
    assert_eq!(first.outcome(), Some(Outcome::Succeeded));
    assert_eq!(h.target.deploy_invocations(), 1);
}

/// Scenario D (queue): the second deployment waits for the first.
#[tokio::test]
async fn test_second_push_queued_while_deploying() {
    let h = harness(
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production").with_apply_delay(Duration::from_millis(200)),
    );

    let first = h.pipeline.start(push("q1")).await.expect("started");
    wait_for_state(&h.pipeline, &first.id, ExecutionState::Deploying).await;
    let second = h.pipeline.start(push("q2")).await.expect("started");

    let first = first.wait().await.expect("first finished");
    let second = second.wait().await.expect("second finished");
    assert_eq!(first.outcome(), Some(Outcome::Succeeded));
    assert_eq!(second.outcome(), Some(Outcome::Succeeded));
    assert_eq!(h.target.max_concurrent_applies(), 1);

    let first_done = first.finished_at().expect("finished");
    let second_deploying = second
        .transitions()
        .iter()
        .find(|t| t.to == ExecutionState::Deploying)
        .expect("second deployed")
        .at;
    assert!(second_deploying >= first_done);
}

/// At most one execution is deploying per environment under concurrent load.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_deploy_one_at_a_time() {
    let h = harness(
        vec![sh("lint", "exit 0"), sh("scan", "exit 0").advisory()],
        MemoryTarget::new("production").with_apply_delay(Duration::from_millis(20)),
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        handles.push(
            h.pipeline
                .start(push(&format!("s{i}")))
                .await
                .expect("started"),
        );
    }
    let mut executions = Vec::new();
    for handle in handles {
        executions.push(handle.wait().await.expect("finished"));
    }

    assert!(executions
        .iter()
        .all(|e| e.outcome() == Some(Outcome::Succeeded)));
    assert_eq!(h.target.deploy_invocations(), 8);
    assert_eq!(h.target.max_concurrent_applies(), 1);

    let mut windows: Vec<_> = executions
        .iter()
        .map(|e| {
            let entered = e
                .transitions()
                .iter()
                .find(|t| t.to == ExecutionState::Deploying)
                .expect("deployed")
                .at;
            (entered, e.finished_at().expect("finished"))
        })
        .collect();
    windows.sort();
    for pair in windows.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "deploying windows overlap");
    }
}

/// A pull request runs the reduced path and never touches the target.
#[tokio::test]
async fn test_pull_request_never_deploys() {
    let reporter = Arc::new(RecordingReporter::new());
    let target = Arc::new(MemoryTarget::new("production"));
    let pipeline = Pipeline::new(
        Arc::new(MemoryExecutionStore::new()),
        Arc::new(StaticSource::new("infra/stack.yaml", TEMPLATE)),
        vec![sh("lint", "exit 0")],
        DeploymentExecutor::new(target.clone(), fast_settings()),
        grant_all(),
    )
    .with_reporter(reporter.clone(), "stackgate/validate");

    let trigger = TriggerEvent::pull_request(SourceRef::new("org/infra", "feature/x", "p1"), 17);
    let exec = pipeline.run(trigger).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Succeeded));
    assert!(!exec.attempted_deploy());
    assert_eq!(target.deploy_invocations(), 0);

    let statuses = reporter.statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1].0.commit_sha, "p1");
    assert!(statuses[1].1.description.contains("blocking validators passed"));
}

/// A disabled blocking validator fails the gate instead of being dropped.
#[tokio::test]
async fn test_disabled_blocking_validator_fails_gate() {
    let h = harness(
        vec![sh("lint", "exit 0"), sh("scan", "exit 0").disabled()],
        MemoryTarget::new("production"),
    );

    let exec = h.pipeline.run(push("x1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Failed));
    let verdict = exec.verdict("testing").expect("verdict");
    assert_eq!(
        verdict.result("scan").expect("scan result").status,
        ValidationStatus::Error
    );
    assert_eq!(h.target.deploy_invocations(), 0);
}

/// Cancelling during testing stops the validator and ends as cancelled.
#[tokio::test]
async fn test_cancel_during_testing() {
    let h = harness(vec![sh("slow", "sleep 30")], MemoryTarget::new("production"));

    let handle = h.pipeline.start(push("t1")).await.expect("started");
    wait_for_state(&h.pipeline, &handle.id, ExecutionState::Testing).await;
    assert!(h.pipeline.cancel(&handle.id).await.expect("cancel"));

    let exec = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation is prompt")
        .expect("finished");
    assert_eq!(exec.outcome(), Some(Outcome::Cancelled));
    assert!(exec.verdicts().is_empty());
    assert_eq!(h.target.deploy_invocations(), 0);
}

/// Cancelling during deployment releases the environment lock.
#[tokio::test]
async fn test_cancel_during_deploy_releases_lock() {
    let h = harness(
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production").with_apply_delay(Duration::from_secs(30)),
    );

    let handle = h.pipeline.start(push("l1")).await.expect("started");
    wait_for_state(&h.pipeline, &handle.id, ExecutionState::Deploying).await;
    assert!(h.pipeline.locks().is_locked("production"));

    h.pipeline.cancel(&handle.id).await.expect("cancel");
    let exec = handle.wait().await.expect("finished");

    assert_eq!(exec.outcome(), Some(Outcome::Cancelled));
    assert!(!h.pipeline.locks().is_locked("production"));
    assert!(!h.pipeline.is_running(exec.id()));
}

/// Cancelling while the template is still being fetched ends as cancelled
/// without reaching the gate.
#[tokio::test]
async fn test_cancel_during_sourcing() {
    let source = Arc::new(
        StaticSource::new("infra/stack.yaml", TEMPLATE).with_delay(Duration::from_secs(30)),
    );
    let target = Arc::new(MemoryTarget::new("production"));
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(MemoryExecutionStore::new()),
        source.clone(),
        vec![sh("lint", "exit 0")],
        DeploymentExecutor::new(target.clone(), fast_settings()),
        grant_all(),
    ));

    let handle = pipeline.start(push("s1")).await.expect("started");
    wait_for_state(&pipeline, &handle.id, ExecutionState::Sourcing).await;
    assert!(pipeline.cancel(&handle.id).await.expect("cancel"));

    let exec = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation is prompt")
        .expect("finished");
    assert_eq!(exec.outcome(), Some(Outcome::Cancelled));
    assert!(exec.artifact_digest().is_none());
    assert!(exec.verdicts().is_empty());
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(target.deploy_invocations(), 0);
}

/// An execution left open in the store with no task driving it (e.g. after
/// a daemon restart) is cancelled directly in storage.
#[tokio::test]
async fn test_cancel_orphaned_execution() {
    let h = harness(vec![sh("lint", "exit 0")], MemoryTarget::new("production"));
    let mut orphan = ExecutionRecorder::start(h.store.clone(), push("0rphan"))
        .await
        .expect("recorded");
    orphan
        .transition(ExecutionState::Sourcing, None)
        .await
        .expect("sourcing");
    let id = orphan.execution_id().clone();
    assert!(!h.pipeline.is_running(&id));

    assert!(h.pipeline.cancel(&id).await.expect("cancel"));
    let exec = h.pipeline.execution(&id).await.expect("stored");
    assert_eq!(exec.outcome(), Some(Outcome::Cancelled));
    assert_eq!(
        states(&exec),
        vec![ExecutionState::Sourcing, ExecutionState::Cancelled]
    );
    assert_eq!(
        h.store.get(&id).await.expect("record").outcome.as_deref(),
        Some("cancelled")
    );

    // Already terminal: a second cancel is a no-op.
    assert!(!h.pipeline.cancel(&id).await.expect("cancel again"));
    assert_eq!(h.target.deploy_invocations(), 0);
}

/// A resource that disappeared from the template is deleted from the
/// environment.
#[tokio::test]
async fn test_removed_resource_is_deleted() {
    let h = harness(
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production").with_deployed(vec![DeployedResource {
            logical_id: "Alerts".to_string(),
            resource_type: "AWS::SNS::Topic".to_string(),
            revision: Some("old".to_string()),
        }]),
    );

    let exec = h.pipeline.run(push("r1")).await.expect("pipeline ran");
    assert_eq!(exec.outcome(), Some(Outcome::Succeeded));

    let deletes: Vec<_> = h
        .target
        .applied()
        .into_iter()
        .filter(|c| c.action == ResourceAction::Delete)
        .map(|c| c.logical_id)
        .collect();
    assert_eq!(deletes, vec!["Alerts".to_string()]);

    let mut remaining: Vec<_> = h
        .target
        .resources()
        .into_iter()
        .map(|r| r.logical_id)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec!["Jobs".to_string(), "Logs".to_string()]);
}

/// Two pipelines sharing a lock table never deploy the same environment at
/// once.
#[tokio::test]
async fn test_pipelines_sharing_locks_exclude_each_other() {
    let locks = Arc::new(EnvironmentLocks::new());
    let build = |target: Arc<MemoryTarget>| {
        Arc::new(
            Pipeline::new(
                Arc::new(MemoryExecutionStore::new()),
                Arc::new(StaticSource::new("infra/stack.yaml", TEMPLATE)),
                vec![sh("lint", "exit 0")],
                DeploymentExecutor::new(target, fast_settings()),
                grant_all(),
            )
            .with_locks(locks.clone())
            .with_conflict_policy(ConflictPolicy::Reject, None),
        )
    };
    let slow = Arc::new(
        MemoryTarget::new("production").with_apply_delay(Duration::from_millis(300)),
    );
    let other = Arc::new(MemoryTarget::new("production"));
    let first = build(slow.clone());
    let second = build(other.clone());

    let handle = first.start(push("x1")).await.expect("started");
    wait_for_state(&first, &handle.id, ExecutionState::Deploying).await;
    assert!(second.locks().is_locked("production"));

    let rejected = second.run(push("x2")).await.expect("pipeline ran");
    assert_eq!(rejected.outcome(), Some(Outcome::Failed));
    assert!(!rejected.attempted_deploy());
    assert_eq!(other.deploy_invocations(), 0);

    let finished = handle.wait().await.expect("finished");
    assert_eq!(finished.outcome(), Some(Outcome::Succeeded));
    assert!(!locks.is_locked("production"));
}

/// A change that never settles fails the stage with an explicit timeout.
#[tokio::test]
async fn test_unsettled_change_times_out() {
    let h = harness_with(
        Arc::new(MemoryExecutionStore::new()),
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production").with_statuses(vec![ChangeStatus::InProgress; 1000]),
        grant_all(),
        ExecutorSettings {
            poll_interval: Duration::from_millis(5),
            ceiling: Duration::from_millis(50),
        },
        ConflictPolicy::Queue,
    );

    let exec = h.pipeline.run(push("to1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Failed));
    let error = exec.error().expect("error recorded");
    assert!(error.contains("timed out"), "{error}");
    assert!(error.contains("in_progress"), "{error}");
    assert!(h.target.poll_count() > 0);
}

/// A failed change surfaces the target's reason.
#[tokio::test]
async fn test_failed_change_fails_execution() {
    let h = harness(
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production")
            .with_statuses(vec![ChangeStatus::Failed("bucket name taken".to_string())]),
    );

    let exec = h.pipeline.run(push("f1")).await.expect("pipeline ran");

    assert_eq!(exec.outcome(), Some(Outcome::Failed));
    assert!(exec.error().expect("error").contains("bucket name taken"));
}

/// Executions are queryable by commit and by outcome.
#[tokio::test]
async fn test_executions_queryable_by_commit_and_outcome() {
    let h = harness(vec![sh("lint", "exit 0")], MemoryTarget::new("production"));
    h.pipeline.run(push("aaa")).await.expect("ran");
    h.pipeline.run(push("bbb")).await.expect("ran");
    let failing = harness_with(
        h.store.clone(),
        vec![sh("lint", "exit 1")],
        MemoryTarget::new("production"),
        grant_all(),
        fast_settings(),
        ConflictPolicy::Queue,
    );
    failing.pipeline.run(push("aaa")).await.expect("ran");

    let by_commit = h
        .pipeline
        .list(&ExecutionQuery::all().with_commit("aaa"))
        .await
        .expect("list");
    assert_eq!(by_commit.len(), 2);

    let failed = h
        .pipeline
        .list(&ExecutionQuery::all().with_outcome("failed"))
        .await
        .expect("list");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].trigger().source.commit_sha, "aaa");
}

/// The same run works against the SurrealDB store.
#[tokio::test]
async fn test_pipeline_with_surreal_store() {
    let store = SurrealExecutionStore::in_memory()
        .await
        .expect("in-memory surreal");
    let h = harness_with(
        Arc::new(store),
        vec![sh("lint", "exit 0")],
        MemoryTarget::new("production"),
        grant_all(),
        fast_settings(),
        ConflictPolicy::Queue,
    );

    let exec = h.pipeline.run(push("sur1")).await.expect("pipeline ran");
    let reloaded = h.pipeline.execution(exec.id()).await.expect("reloaded");
    assert_eq!(reloaded.outcome(), Some(Outcome::Succeeded));
    assert_eq!(reloaded.transitions().len(), 4);
}
