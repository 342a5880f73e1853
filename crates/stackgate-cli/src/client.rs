//! Signed client for the stackgated control API.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use stackgate_ci::trigger::{sign_payload, SIGNATURE_HEADER};
use stackgate_core::PipelineExecution;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Accepted {
    execution_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

pub struct DaemonClient {
    base: String,
    secret: Vec<u8>,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl DaemonClient {
    pub fn new(base: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            http: reqwest::Client::new(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Request a manual run of `commit`; returns the new execution id.
    pub async fn trigger(&self, commit: &str, branch: &str) -> Result<String> {
        let body = serde_json::to_vec(&json!({ "commit": commit, "branch": branch }))?;
        let response = self
            .http
            .post(format!("{}/executions", self.base))
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, sign_payload(&self.secret, &body))
            .body(body)
            .send()
            .await
            .with_context(|| format!("cannot reach stackgated at {}", self.base))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_default();
            anyhow::bail!("stackgated refused the run ({status}): {message}");
        }
        let accepted: Accepted = response.json().await?;
        Ok(accepted.execution_id)
    }

    pub async fn execution(&self, id: &str) -> Result<PipelineExecution> {
        let response = self
            .http
            .get(format!("{}/executions/{id}", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Poll until the execution reaches a terminal state.
    pub async fn wait(&self, id: &str) -> Result<PipelineExecution> {
        loop {
            let execution = self.execution(id).await?;
            if execution.is_terminal() {
                return Ok(execution);
            }
            debug!(execution_id = %id, state = %execution.state(), "waiting");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
