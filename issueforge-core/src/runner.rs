//! The per-issue execution pipeline (§4.3): preflight, workspace
//! provisioning, prompt synthesis, generator invocation, change
//! inspection, commit and push, diff capture, summary, cleanup.

use std::fs;
use std::path::Path;
use std::process::Command;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::RunnerError;
use crate::generator::{Generator, GeneratorOutcome};
use crate::issue_source::IssueSource;
use crate::model::{Issue, IssueDetails, IssueState, RunnerResult, RunnerStatus};
use crate::store::Store;

/// Pure decision: does this issue's current labels/state pass the
/// preflight skip filters? `Some(reason)` means skip; `None` means proceed.
/// Order matters: not-open, then missing trigger, then skip labels.
pub fn decide_skip(state: IssueState, labels: &[String], trigger_label: &str, skip_labels: &[String]) -> Option<String> {
    if state != IssueState::Open {
        return Some("issue is no longer open".to_string());
    }
    if !labels.iter().any(|l| l == trigger_label) {
        return Some(format!("missing trigger label \"{trigger_label}\""));
    }
    let mut present: Vec<&str> = skip_labels.iter().filter(|sl| labels.iter().any(|l| l == *sl)).map(String::as_str).collect();
    if !present.is_empty() {
        present.sort_unstable();
        return Some(format!("contains skip label(s): {}", present.join(", ")));
    }
    None
}

/// Collapse whitespace and truncate at 72 chars with a `...` suffix,
/// matching the commit-message `short_title` rule.
pub fn short_title(title: &str) -> String {
    let collapsed: String = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= 72 {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(72).collect();
        format!("{truncated}...")
    }
}

#[derive(Serialize)]
struct SummaryArtifacts {
    prompt: String,
    stdout: String,
    stderr: String,
    diff: String,
}

#[derive(Serialize)]
struct Summary {
    artifacts: SummaryArtifacts,
    branch: Option<String>,
    codex_exit_code: Option<i32>,
    error: Option<String>,
    finished_at: String,
    head_sha: Option<String>,
    issue_id: u64,
    run_dir: String,
    started_at: String,
    status: String,
}

pub struct Runner<'a> {
    pub issue_source: &'a dyn IssueSource,
    pub generator: &'a dyn Generator,
    pub config: &'a Config,
}

impl<'a> Runner<'a> {
    /// Run the full pipeline for a just-claimed issue. Always returns a
    /// `RunnerResult` with artifacts written; only I/O failures that make
    /// the run directory itself unusable propagate as `Err`.
    pub fn process(&self, store: &mut Store, issue: &Issue) -> anyhow::Result<RunnerResult> {
        let started_at = Utc::now();
        let timestamp = started_at.format("%Y%m%dT%H%M%SZ").to_string();

        let namespace = &issue.namespace;
        let runs_dir = self.config.workdir.join("runs").join(namespace).join(format!("issue-{}", issue.id));
        let run_dir = runs_dir.join(format!("run-{timestamp}"));
        fs::create_dir_all(&run_dir).map_err(|e| RunnerError::new("create run_dir", e.into()))?;

        let worktrees_dir = self.config.workdir.join("worktrees").join(namespace);
        let worktree = worktrees_dir.join(format!("issue-{}", issue.id));
        let branch = format!("{}/issue-{}", self.config.branch_prefix, issue.id);

        let result = self.process_inner(store, issue, &run_dir, &worktree, &branch, started_at);

        let (status, error, exit_code, head_sha) = match &result {
            Ok(r) => (r.status, r.error.clone(), r.exit_code, r.head_sha.clone()),
            Err(e) => (RunnerStatus::Failed, Some(e.to_string()), None, None),
        };

        self.write_summary(&run_dir, issue.id, status, &branch, head_sha.as_deref(), error.as_deref(), exit_code, started_at)?;

        let keep = self.config.keep_worktree_on_failure && matches!(status, RunnerStatus::Failed | RunnerStatus::Timeout);
        if !keep {
            cleanup_worktree(&self.config.repo_root, &worktree, &branch);
        }

        result
    }

    fn process_inner(
        &self,
        store: &mut Store,
        issue: &Issue,
        run_dir: &Path,
        worktree: &Path,
        branch: &str,
        started_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<RunnerResult> {
        // 1. Preflight re-read.
        let details = self.issue_source.fetch_issue(issue.id)?;
        store.update_issue_details(&details)?;

        if let Some(reason) = decide_skip(details.state, &details.labels, &self.config.trigger_label, &self.config.skip_labels) {
            info!(issue_id = issue.id, reason, "skipping issue");
            return Ok(RunnerResult { status: RunnerStatus::Skipped, branch: None, run_dir: run_dir.to_path_buf(), head_sha: None, error: Some(reason), exit_code: None });
        }

        // 2. Workspace provisioning.
        provision_worktree(&self.config.repo_root, worktree, branch, &self.config.base_branch)?;

        // 3. Prompt synthesis.
        let prompt = build_prompt(&details, &self.config.repo_root, &self.config.conventions_files);
        fs::write(run_dir.join("prompt.md"), &prompt)?;

        // 4. Generator invocation.
        let outcome = self.generator.run(issue.id, &prompt, worktree, self.config.codex_timeout_seconds)?;

        let (exit_code, stdout, stderr) = match outcome {
            GeneratorOutcome::Finished { exit_code, stdout, stderr, .. } => (Some(exit_code), stdout, stderr),
            GeneratorOutcome::TimedOut { stdout_so_far, stderr_so_far } => {
                fs::write(run_dir.join("codex_stdout.log"), &stdout_so_far)?;
                fs::write(run_dir.join("codex_stderr.log"), &stderr_so_far)?;
                let error = format!("timed out after {}s", self.config.codex_timeout_seconds);
                warn!(issue_id = issue.id, "generator timed out");
                return Ok(RunnerResult { status: RunnerStatus::Timeout, branch: Some(branch.to_string()), run_dir: run_dir.to_path_buf(), head_sha: None, error: Some(error), exit_code: None });
            }
        };
        fs::write(run_dir.join("codex_stdout.log"), &stdout)?;
        fs::write(run_dir.join("codex_stderr.log"), &stderr)?;

        // 5. Change inspection.
        if let Some(code) = exit_code {
            if code != 0 {
                let error = format!("Codex exited with code {code}");
                return Ok(RunnerResult { status: RunnerStatus::Failed, branch: Some(branch.to_string()), run_dir: run_dir.to_path_buf(), head_sha: None, error: Some(error), exit_code: Some(code) });
            }
        }

        let porcelain = git_output(worktree, &["status", "--porcelain"])?;
        if porcelain.trim().is_empty() {
            return Ok(RunnerResult {
                status: RunnerStatus::Skipped,
                branch: Some(branch.to_string()),
                run_dir: run_dir.to_path_buf(),
                head_sha: None,
                error: Some("no changes produced".to_string()),
                exit_code,
            });
        }

        // 6. Commit and push.
        git(worktree, &["add", "-A"])?;
        let message = format!("Fix #{}: {}", issue.id, short_title(&details.title));
        git(worktree, &["commit", "-m", &message])?;
        let head_sha = git_output(worktree, &["rev-parse", "HEAD"])?.trim().to_string();
        git(worktree, &["push", "-u", "origin", branch])?;

        // 7. Diff capture.
        let diff = git_output(worktree, &["show", "--patch", "--stat", "HEAD"])
            .or_else(|_| git_output(worktree, &["diff", "--patch", "--stat"]))
            .unwrap_or_default();
        fs::write(run_dir.join("git_diff.patch"), &diff)?;

        let _ = started_at;
        Ok(RunnerResult {
            status: RunnerStatus::Pushed,
            branch: Some(branch.to_string()),
            run_dir: run_dir.to_path_buf(),
            head_sha: Some(head_sha),
            error: None,
            exit_code,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_summary(
        &self,
        run_dir: &Path,
        issue_id: u64,
        status: RunnerStatus,
        branch: &str,
        head_sha: Option<&str>,
        error: Option<&str>,
        exit_code: Option<i32>,
        started_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let status_str = match status {
            RunnerStatus::Pushed => "pushed",
            RunnerStatus::Skipped => "skipped",
            RunnerStatus::Failed => "failed",
            RunnerStatus::Timeout => "timeout",
        };
        let summary = Summary {
            artifacts: SummaryArtifacts {
                prompt: "prompt.md".to_string(),
                stdout: "codex_stdout.log".to_string(),
                stderr: "codex_stderr.log".to_string(),
                diff: "git_diff.patch".to_string(),
            },
            branch: Some(branch.to_string()),
            codex_exit_code: exit_code,
            error: error.map(str::to_string),
            finished_at: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            head_sha: head_sha.map(str::to_string),
            issue_id,
            run_dir: run_dir.to_string_lossy().to_string(),
            started_at: started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            status: status_str.to_string(),
        };
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(run_dir.join("summary.json"), json)?;
        Ok(())
    }
}

fn build_prompt(details: &IssueDetails, repo_root: &Path, conventions_files: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("# Task\n\n");
    prompt.push_str(&format!("Resolve issue #{}: {}\n\n", details.id, details.title));
    if let Some(url) = &details.url {
        prompt.push_str(&format!("Issue URL: {url}\n\n"));
    }
    prompt.push_str("## Description\n\n");
    match &details.body {
        Some(body) if !body.trim().is_empty() => prompt.push_str(body),
        _ => prompt.push_str("_(no description provided)_"),
    }
    prompt.push_str("\n\n## Rules\n\n");
    prompt.push_str("- Make the minimal change that resolves the issue.\n");
    prompt.push_str("- Do not touch unrelated files.\n");
    prompt.push_str("- If the request is ambiguous, stop and ask rather than guessing.\n");
    prompt.push_str("- Include the commands you used to verify the change in your final output.\n");

    let conventions: Vec<(String, String)> = conventions_files
        .iter()
        .filter_map(|name| {
            let path = repo_root.join(name);
            fs::read_to_string(&path).ok().filter(|content| !content.trim().is_empty()).map(|content| (name.clone(), content))
        })
        .collect();

    if !conventions.is_empty() {
        prompt.push_str("\n## Repository Conventions\n\n");
        for (name, content) in conventions {
            prompt.push_str(&format!("### {name}\n\n{content}\n\n"));
        }
    }

    prompt
}

fn git(cwd: &Path, args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("git").current_dir(cwd).args(args).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn git_output(cwd: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git").current_dir(cwd).args(args).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn provision_worktree(repo_root: &Path, worktree: &Path, branch: &str, base_branch: &str) -> anyhow::Result<()> {
    // Tolerate errors removing any pre-existing worktree/branch — a prior
    // crashed run may have left either behind.
    let worktree_str = worktree.to_string_lossy().to_string();
    let _ = Command::new("git").current_dir(repo_root).args(["worktree", "remove", "--force", &worktree_str]).output();
    let _ = Command::new("git").current_dir(repo_root).args(["worktree", "prune"]).output();
    let _ = Command::new("git").current_dir(repo_root).args(["branch", "-D", branch]).output();

    if let Some(parent) = worktree.parent() {
        fs::create_dir_all(parent)?;
    }

    git(repo_root, &["worktree", "add", "-B", branch, &worktree_str, base_branch])
}

fn cleanup_worktree(repo_root: &Path, worktree: &Path, branch: &str) {
    let worktree_str = worktree.to_string_lossy().to_string();
    let _ = Command::new("git").current_dir(repo_root).args(["worktree", "remove", "--force", &worktree_str]).output();
    let _ = Command::new("git").current_dir(repo_root).args(["worktree", "prune"]).output();
    let _ = fs::remove_dir_all(worktree);
    let _ = branch; // the branch itself is left in place — it is the publish target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_filter_not_open_takes_priority() {
        let reason = decide_skip(IssueState::Closed, &["enhancement".into()], "enhancement", &[]);
        assert_eq!(reason.as_deref(), Some("issue is no longer open"));
    }

    #[test]
    fn skip_filter_missing_trigger_label() {
        let reason = decide_skip(IssueState::Open, &["bug".into()], "enhancement", &[]);
        assert_eq!(reason.as_deref(), Some("missing trigger label \"enhancement\""));
    }

    #[test]
    fn skip_filter_reports_alphabetised_skip_labels() {
        let labels = vec!["enhancement".to_string(), "wontfix".to_string(), "blocked".to_string()];
        let reason = decide_skip(IssueState::Open, &labels, "enhancement", &["wontfix".to_string(), "blocked".to_string()]);
        assert_eq!(reason.as_deref(), Some("contains skip label(s): blocked, wontfix"));
    }

    #[test]
    fn skip_filter_passes_eligible_issue() {
        let labels = vec!["enhancement".to_string()];
        assert_eq!(decide_skip(IssueState::Open, &labels, "enhancement", &["wontfix".to_string()]), None);
    }

    #[test]
    fn short_title_passes_through_short_titles() {
        assert_eq!(short_title("Fix the thing"), "Fix the thing");
    }

    #[test]
    fn short_title_collapses_whitespace() {
        assert_eq!(short_title("Fix   the\n  thing"), "Fix the thing");
    }

    #[test]
    fn short_title_truncates_long_titles_at_72_chars() {
        let long = "x".repeat(100);
        let result = short_title(&long);
        assert_eq!(result.chars().count(), 75); // 72 chars + "..."
        assert!(result.ends_with("..."));
    }
}
