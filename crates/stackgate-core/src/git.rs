//! Git integration utilities for reading templates at a given commit.

use std::path::Path;
use std::process::Command;

use crate::domain::artifact::is_commit_sha;
use crate::domain::error::{PipelineError, Result};

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    resolve_commit(repo_dir, "HEAD")
}

/// Resolve any revision (branch, tag, short sha) to a full commit SHA.
pub fn resolve_commit(repo_dir: &Path, rev: &str) -> Result<String> {
    if rev.is_empty() || rev.starts_with('-') {
        return Err(PipelineError::Source(format!("invalid revision {rev:?}")));
    }
    let spec = format!("{rev}^{{commit}}");
    let stdout = run_git(repo_dir, &["rev-parse", "--verify", &spec])?;
    let sha = String::from_utf8_lossy(&stdout).trim().to_string();
    if sha.is_empty() {
        return Err(PipelineError::Source(format!(
            "git rev-parse {rev} returned empty output"
        )));
    }
    Ok(sha)
}

/// Read the contents of `path` as of `commit` without touching the work tree.
///
/// `commit` must be a hex commit id; revision expressions are refused.
pub fn read_blob(repo_dir: &Path, commit: &str, path: &str) -> Result<Vec<u8>> {
    if !is_commit_sha(commit) {
        return Err(PipelineError::Source(format!(
            "{commit:?} is not a commit id"
        )));
    }
    let object = format!("{commit}:{path}");
    run_git(repo_dir, &["cat-file", "blob", &object])
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| PipelineError::Source(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Source(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_repo_with_template() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init"]);
        git(dir.path(), &["config", "user.name", "test-user"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(
            dir.path().join("template.yaml"),
            "Resources:\n  B:\n    Type: AWS::S3::Bucket\n",
        )
        .unwrap();
        git(dir.path(), &["add", "template.yaml"]);
        git(dir.path(), &["commit", "-m", "initial"]);
        dir
    }

    #[test]
    fn capture_head_sha_returns_40_hex_chars() {
        let repo = make_repo_with_template();
        let sha = capture_head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn read_blob_at_commit_ignores_work_tree_edits() {
        let repo = make_repo_with_template();
        let sha = capture_head_sha(repo.path()).unwrap();
        std::fs::write(repo.path().join("template.yaml"), "edited").unwrap();

        let body = read_blob(repo.path(), &sha, "template.yaml").unwrap();
        assert!(String::from_utf8(body).unwrap().contains("AWS::S3::Bucket"));
    }

    #[test]
    fn option_like_commits_never_reach_git() {
        let repo = make_repo_with_template();
        let target = repo.path().join("written");
        let commit = format!("--output={}", target.display());

        let err = read_blob(repo.path(), &commit, "template.yaml").unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
        assert!(std::fs::read_dir(repo.path())
            .unwrap()
            .all(|e| !e.unwrap().file_name().to_string_lossy().starts_with("written")));

        assert!(read_blob(repo.path(), "HEAD", "template.yaml").is_err());
        assert!(resolve_commit(repo.path(), "--all").is_err());
    }

    #[test]
    fn read_blob_missing_path_is_source_error() {
        let repo = make_repo_with_template();
        let sha = capture_head_sha(repo.path()).unwrap();
        let err = read_blob(repo.path(), &sha, "nope.yaml").unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
    }

    #[test]
    fn non_repo_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()));
        assert!(capture_head_sha(dir.path()).is_err());
    }
}
