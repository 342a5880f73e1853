//! Per-environment deployment locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackgate_core::PipelineError;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// What a deployment does when its environment is already locked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait for the holder to finish.
    #[default]
    Queue,
    /// Fail immediately with a retryable conflict.
    Reject,
}

/// Lock table keyed by environment identity.
///
/// Only the deploying stage takes a lock; everything before it runs freely
/// across executions.
#[derive(Default)]
pub struct EnvironmentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EnvironmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, environment: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(environment.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Acquire the environment's lock according to `policy`.
    ///
    /// With [`ConflictPolicy::Queue`] and a `max_wait`, waiting longer than
    /// `max_wait` is reported as a conflict as well.
    pub async fn acquire(
        &self,
        environment: &str,
        policy: ConflictPolicy,
        max_wait: Option<Duration>,
    ) -> Result<EnvironmentGuard, PipelineError> {
        let lock = self.lock_for(environment);
        let conflict = || PipelineError::ConcurrentDeploymentConflict {
            environment: environment.to_string(),
        };

        let guard = match policy {
            ConflictPolicy::Reject => lock.try_lock_owned().map_err(|_| conflict())?,
            ConflictPolicy::Queue => match lock.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(environment, "environment busy, queueing deployment");
                    match max_wait {
                        Some(wait) => tokio::time::timeout(wait, lock.lock_owned())
                            .await
                            .map_err(|_| conflict())?,
                        None => lock.lock_owned().await,
                    }
                }
            },
        };
        debug!(environment, "environment lock acquired");
        Ok(EnvironmentGuard {
            environment: environment.to_string(),
            _guard: guard,
        })
    }

    /// Whether a deployment currently holds the environment.
    pub fn is_locked(&self, environment: &str) -> bool {
        self.lock_for(environment).try_lock().is_err()
    }
}

/// Held while deploying; the lock is released when this is dropped on any
/// exit path, including cancellation and unwinding.
pub struct EnvironmentGuard {
    environment: String,
    _guard: OwnedMutexGuard<()>,
}

impl EnvironmentGuard {
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        debug!(environment = %self.environment, "environment lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_when_held() {
        let locks = EnvironmentLocks::new();
        let _held = locks
            .acquire("prod", ConflictPolicy::Reject, None)
            .await
            .unwrap();
        let err = locks
            .acquire("prod", ConflictPolicy::Reject, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ConcurrentDeploymentConflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_environments_are_independent() {
        let locks = EnvironmentLocks::new();
        let _prod = locks
            .acquire("prod", ConflictPolicy::Reject, None)
            .await
            .unwrap();
        assert!(locks
            .acquire("staging", ConflictPolicy::Reject, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let locks = EnvironmentLocks::new();
        let held = locks
            .acquire("prod", ConflictPolicy::Reject, None)
            .await
            .unwrap();
        assert!(locks.is_locked("prod"));
        drop(held);
        assert!(!locks.is_locked("prod"));
    }

    #[tokio::test]
    async fn test_queue_waits_for_release() {
        let locks = Arc::new(EnvironmentLocks::new());
        let held = locks
            .acquire("prod", ConflictPolicy::Queue, None)
            .await
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire("prod", ConflictPolicy::Queue, None)
                    .await
                    .map(|g| g.environment().to_string())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "prod");
    }

    #[tokio::test]
    async fn test_queue_with_bounded_wait_times_out() {
        let locks = EnvironmentLocks::new();
        let _held = locks
            .acquire("prod", ConflictPolicy::Queue, None)
            .await
            .unwrap();
        let err = locks
            .acquire("prod", ConflictPolicy::Queue, Some(Duration::from_millis(20)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ConcurrentDeploymentConflict { .. }));
    }

    #[tokio::test]
    async fn test_release_on_panic_unwind() {
        let locks = Arc::new(EnvironmentLocks::new());
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks
                    .acquire("prod", ConflictPolicy::Reject, None)
                    .await
                    .unwrap();
                panic!("deployment blew up");
            })
        };
        assert!(task.await.is_err());
        assert!(!locks.is_locked("prod"));
    }
}
