//! Out-of-process tool execution.

use std::io::Write;
use std::process::Stdio;
use std::time::{Duration, Instant};

use stackgate_core::Artifact;
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Result of a completed tool process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams, as stored on a validation result.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Why a tool produced no [`ToolOutput`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to stage template: {0}")]
    Staging(std::io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// A private copy of the template on disk, removed on drop.
pub struct StagedTemplate {
    file: NamedTempFile,
}

impl StagedTemplate {
    /// Write the artifact body to a fresh temp file with the template's extension.
    pub fn write(artifact: &Artifact) -> std::io::Result<Self> {
        let suffix = format!(".{}", artifact.extension());
        let mut file = tempfile::Builder::new()
            .prefix("stackgate-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(artifact.body())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path_str(&self) -> String {
        self.file.path().to_string_lossy().into_owned()
    }
}

/// Runs tool processes with a time bound.
pub struct ToolRunner;

impl ToolRunner {
    /// Run `argv` to completion or until `timeout_secs` elapses.
    ///
    /// The child is killed when the returned future is dropped, so a timeout
    /// or a cancelled caller never leaves the process running.
    pub async fn run(argv: &[String], timeout_secs: u64) -> Result<ToolOutput, RunError> {
        let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;
        let start = Instant::now();

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = if timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
                .map_err(|_| RunError::Timeout(timeout_secs))?
        } else {
            child.wait_with_output().await
        }
        .map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Last `n` non-empty lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}
