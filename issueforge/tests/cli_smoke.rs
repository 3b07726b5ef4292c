//! Binary smoke tests for the `issueforge` CLI. These exercise the
//! compiled binary directly, so a route wired to the wrong subcommand or
//! a broken flag would fail here even if the unit tests all pass.

use assert_cmd::Command;
use predicates::prelude::*;
use std::process::Command as StdCommand;
use tempfile::TempDir;

#[allow(deprecated)]
fn issueforge() -> Command {
    Command::cargo_bin("issueforge").unwrap()
}

/// A throwaway git repo with a remote origin, so namespace derivation and
/// `gh --repo` resolution have something to parse.
fn temp_git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    StdCommand::new("git").arg("init").current_dir(dir.path()).output().unwrap();
    StdCommand::new("git")
        .args(["remote", "add", "origin", "https://github.com/Acme/widgets.git"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    dir
}

#[test]
fn binary_exists() {
    issueforge();
}

#[test]
fn version_flag() {
    issueforge().arg("--version").assert().success().stdout(predicate::str::contains("issueforge"));
}

#[test]
fn help_lists_subcommands() {
    let output = issueforge().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["status", "run-once", "daemon", "doctor", "clean"] {
        assert!(stdout.contains(cmd), "help text should mention '{cmd}' subcommand");
    }
}

#[test]
fn status_on_fresh_namespace_reports_zero_counts() {
    let repo = temp_git_repo();
    let workdir = TempDir::new().unwrap();

    issueforge()
        .args(["--workdir", workdir.path().to_str().unwrap(), "--repo", repo.path().to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"pending\s+0").unwrap());
}

#[test]
fn clean_on_fresh_namespace_reports_zero_rows() {
    let repo = temp_git_repo();
    let workdir = TempDir::new().unwrap();

    issueforge()
        .args(["--workdir", workdir.path().to_str().unwrap(), "--repo", repo.path().to_str().unwrap(), "clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared 0 issue row(s)"));
}

#[test]
fn doctor_reports_git_and_generator_status() {
    let repo = temp_git_repo();
    let workdir = TempDir::new().unwrap();

    let output = issueforge()
        .args(["--workdir", workdir.path().to_str().unwrap(), "--repo", repo.path().to_str().unwrap(), "doctor"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("git"));
    assert!(stdout.contains("generator"));
}

#[test]
fn run_once_without_remote_fails_with_clear_message() {
    let repo = TempDir::new().unwrap();
    StdCommand::new("git").arg("init").current_dir(repo.path()).output().unwrap();
    let workdir = TempDir::new().unwrap();

    issueforge()
        .args(["--workdir", workdir.path().to_str().unwrap(), "--repo", repo.path().to_str().unwrap(), "run-once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no git remote"));
}

#[test]
fn unknown_subcommand_fails() {
    issueforge().arg("nonexistent-command").assert().failure().stderr(predicate::str::contains("unrecognized subcommand"));
}
