//! Typed errors at the collaborator boundary. Orchestration code elsewhere
//! in the crate uses `anyhow::Result`; these variants exist only where a
//! caller needs to pattern-match on *why* an upstream call failed.

use thiserror::Error;

/// A failure from the hosting-platform CLI (the `IssueSource` adapter).
///
/// Carries enough of the subprocess's own output for the daemon's
/// back-off branch and for log lines an operator can act on.
#[derive(Debug, Error)]
#[error("upstream command `{command}` failed (exit {exit_code:?}): {stderr}")]
pub struct UpstreamError {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl UpstreamError {
    pub fn new(command: impl Into<String>, exit_code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Surfaced by the Generator when the wall-clock deadline fires before the
/// child exits. Partial output is preserved for the run directory.
#[derive(Debug, Error)]
#[error("generator timed out after {timeout_seconds}s")]
pub struct GeneratorTimeout {
    pub timeout_seconds: u64,
    pub stdout_so_far: String,
    pub stderr_so_far: String,
}

/// Any version-control or filesystem failure encountered while the Runner
/// provisions a workspace or publishes a branch.
#[derive(Debug, Error)]
#[error("runner error during {stage}: {source}")]
pub struct RunnerError {
    pub stage: String,
    #[source]
    pub source: anyhow::Error,
}

impl RunnerError {
    pub fn new(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self { stage: stage.into(), source }
    }
}
