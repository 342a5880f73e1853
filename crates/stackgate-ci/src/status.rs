//! Commit-status reporting back to the source-control host.

use async_trait::async_trait;
use stackgate_core::{CommitStatus, SourceRef};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Pushes a commit status for a source reference.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, source: &SourceRef, status: &CommitStatus) -> Result<(), StatusError>;
}

/// Posts statuses to `{api_base}/repos/{repository}/statuses/{sha}`.
pub struct HttpStatusReporter {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl HttpStatusReporter {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn status_url(&self, source: &SourceRef) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.api_base, source.repository, source.commit_sha
        )
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(&self, source: &SourceRef, status: &CommitStatus) -> Result<(), StatusError> {
        let url = self.status_url(source);
        debug!(url = %url, state = ?status.state, "posting commit status");

        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::USER_AGENT, "stackgate")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(status);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StatusError::Rejected {
                status: code.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Reporter that drops every status; used when no endpoint is configured.
pub struct NoopReporter;

#[async_trait]
impl StatusReporter for NoopReporter {
    async fn report(&self, _source: &SourceRef, _status: &CommitStatus) -> Result<(), StatusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url_layout() {
        let reporter = HttpStatusReporter::new("https://api.example.com/", None);
        let url = reporter.status_url(&SourceRef::new("org/infra", "feature/x", "abc123"));
        assert_eq!(url, "https://api.example.com/repos/org/infra/statuses/abc123");
    }
}
