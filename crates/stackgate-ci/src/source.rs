//! Artifact retrieval.

use std::path::PathBuf;

use async_trait::async_trait;
use stackgate_core::{git, Artifact, PipelineError, Result, SourceRef};

/// Fetches the deployable template for a source reference.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, source: &SourceRef) -> Result<Artifact>;
}

/// Reads the template from a local clone at the requested commit.
///
/// The clone is expected to already contain the commit (a fetch hook or a
/// mirror keeps it current); the work tree is never checked out or modified.
pub struct GitSource {
    repo_dir: PathBuf,
    template_path: String,
}

impl GitSource {
    pub fn new(repo_dir: impl Into<PathBuf>, template_path: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            template_path: template_path.into(),
        }
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn fetch(&self, source: &SourceRef) -> Result<Artifact> {
        let repo_dir = self.repo_dir.clone();
        let template_path = self.template_path.clone();
        let commit = source.commit_sha.clone();

        let body = tokio::task::spawn_blocking(move || {
            git::read_blob(&repo_dir, &commit, &template_path)
        })
        .await
        .map_err(|e| PipelineError::Source(format!("git task failed: {e}")))??;

        Artifact::from_template(source.clone(), self.template_path.clone(), body)
    }
}
