//! In-memory fakes for the pipeline's outer boundaries (testing and dry runs)
//!
//! - `MemoryTarget`: a deployment target holding resources in a map
//! - `RecordingReporter`: keeps every commit status it is handed
//! - `StaticSource`: serves one template body for any source reference

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stackgate_core::{
    Artifact, ChangeStatus, CommitStatus, DeployedResource, PipelineError, PlannedChange,
    ResourceAction, Result, SourceRef,
};

use crate::deploy::{DeployError, DeployResult, DeploymentTarget};
use crate::source::SourceProvider;
use crate::status::{StatusError, StatusReporter};

/// Deployment target backed by a `BTreeMap<logical_id, resource>`.
///
/// `apply` and `poll` hand out scripted statuses in order; once the script
/// is exhausted every call reports `complete`. A change takes effect on the
/// map as soon as it is applied unless its first status is `failed`.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    environment: String,
    resources: Mutex<BTreeMap<String, DeployedResource>>,
    script: Mutex<VecDeque<ChangeStatus>>,
    applied: Mutex<Vec<PlannedChange>>,
    polls: AtomicUsize,
    poll_failures: AtomicUsize,
    deploy_invocations: AtomicUsize,
    active_applies: AtomicUsize,
    max_active_applies: AtomicUsize,
    apply_delay: Option<Duration>,
}

impl MemoryTarget {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Default::default()
        }
    }

    /// Seed already-deployed resources.
    pub fn with_deployed(self, resources: Vec<DeployedResource>) -> Self {
        {
            let mut map = self.resources.lock().unwrap();
            for r in resources {
                map.insert(r.logical_id.clone(), r);
            }
        }
        self
    }

    /// Statuses returned by successive `apply`/`poll` calls.
    pub fn with_statuses(self, statuses: Vec<ChangeStatus>) -> Self {
        self.script.lock().unwrap().extend(statuses);
        self
    }

    /// The next `count` polls fail with a target error before the script
    /// resumes.
    pub fn with_poll_failures(self, count: usize) -> Self {
        self.poll_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep inside every `apply`.
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    /// Every change passed to `apply`, in order.
    pub fn applied(&self) -> Vec<PlannedChange> {
        self.applied.lock().unwrap().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of deployments started (one `deployed` read per deployment).
    pub fn deploy_invocations(&self) -> usize {
        self.deploy_invocations.load(Ordering::SeqCst)
    }

    /// Highest number of `apply` calls observed in flight at once.
    pub fn max_concurrent_applies(&self) -> usize {
        self.max_active_applies.load(Ordering::SeqCst)
    }

    pub fn resources(&self) -> Vec<DeployedResource> {
        self.resources.lock().unwrap().values().cloned().collect()
    }

    fn next_status(&self) -> ChangeStatus {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ChangeStatus::Complete)
    }

    fn record(&self, change: &PlannedChange, revision: &str) {
        let mut map = self.resources.lock().unwrap();
        match change.action {
            ResourceAction::Delete => {
                map.remove(&change.logical_id);
            }
            ResourceAction::Create | ResourceAction::Update => {
                map.insert(
                    change.logical_id.clone(),
                    DeployedResource {
                        logical_id: change.logical_id.clone(),
                        resource_type: change.resource_type.clone(),
                        revision: Some(revision.to_string()),
                    },
                );
            }
        }
    }
}

#[async_trait]
impl DeploymentTarget for MemoryTarget {
    fn environment(&self) -> &str {
        &self.environment
    }

    async fn deployed(&self) -> DeployResult<Vec<DeployedResource>> {
        self.deploy_invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources())
    }

    async fn apply(
        &self,
        change: &PlannedChange,
        artifact: &Artifact,
    ) -> DeployResult<ChangeStatus> {
        let active = self.active_applies.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_applies.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        self.active_applies.fetch_sub(1, Ordering::SeqCst);

        self.applied.lock().unwrap().push(change.clone());
        let status = self.next_status();
        if !matches!(status, ChangeStatus::Failed(_)) {
            self.record(change, artifact.digest().as_str());
        }
        Ok(status)
    }

    async fn poll(&self, _change: &PlannedChange) -> DeployResult<ChangeStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .poll_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeployError::Target("503 throttled".to_string()));
        }
        Ok(self.next_status())
    }
}

/// Status reporter that remembers what it was asked to post.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<(SourceRef, CommitStatus)>>,
    fail: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every status but reports each post as rejected.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<(SourceRef, CommitStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(
        &self,
        source: &SourceRef,
        status: &CommitStatus,
    ) -> std::result::Result<(), StatusError> {
        self.statuses
            .lock()
            .unwrap()
            .push((source.clone(), status.clone()));
        if self.fail {
            return Err(StatusError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Source provider serving the same template for every commit.
#[derive(Debug)]
pub struct StaticSource {
    template_path: String,
    body: std::result::Result<Vec<u8>, String>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(template_path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            template_path: template_path.into(),
            body: Ok(body.into()),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every fetch fails with a source error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            template_path: String::new(),
            body: Err(message.into()),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn fetch(&self, source: &SourceRef) -> Result<Artifact> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.body {
            Ok(body) => {
                Artifact::from_template(source.clone(), self.template_path.clone(), body.clone())
            }
            Err(message) => Err(PipelineError::Source(message.clone())),
        }
    }
}
