//! Argument parsing and command dispatch. One subcommand per CLI surface
//! entry; config resolution and collaborator wiring happen here so
//! `issueforge-core` never has to know where its `Config` came from.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issueforge_core::config::Config;
use issueforge_core::daemon::Daemon;
use issueforge_core::generator::CodexGenerator;
use issueforge_core::github::GhIssueSource;
use issueforge_core::namespace;
use issueforge_core::store::Store;

#[derive(Parser)]
#[command(
    name = "issueforge",
    version,
    about = "Polls labelled issues, drives a code generator in an isolated worktree, and opens a pull request"
)]
pub struct Cli {
    /// Override the state/config directory (default: ~/.issueforge)
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Root of the repository to operate against (default: current directory)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print per-status issue counts for this repository's namespace
    Status,

    /// Run exactly one polling/claim cycle and exit
    #[command(name = "run-once")]
    RunOnce {
        /// Target a specific issue number, bypassing the daily cap
        #[arg(long)]
        issue: Option<u64>,
    },

    /// Run the control loop until interrupted
    Daemon,

    /// Check that required external tools are installed and reachable
    Doctor,

    /// Wipe all persisted state for this repository's namespace
    Clean,
}

/// Exit code policy (§6): 0 success, 1 fatal error, 2 misuse (handled by
/// clap itself on parse failure), 130 interrupted.
pub fn run(cli: Cli) -> Result<i32> {
    let repo_root = cli.repo.clone().unwrap_or_else(|| PathBuf::from("."));
    let remote_url = git_remote_url(&repo_root);
    let namespace = namespace::derive_namespace(remote_url.as_deref(), &repo_root);

    let config = Config::load(cli.workdir.as_deref())?.with_namespace(namespace).with_repo_root(&repo_root);

    match cli.command {
        Commands::Status => cmd_status(&config).map(|()| 0),
        Commands::RunOnce { issue } => cmd_run_once(&config, &repo_root, remote_url.as_deref(), issue),
        Commands::Daemon => cmd_daemon(&config, &repo_root, remote_url.as_deref()),
        Commands::Doctor => cmd_doctor(&config).map(|ok| if ok { 0 } else { 1 }),
        Commands::Clean => cmd_clean(&config).map(|()| 0),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = Store::open(&config.db_path, config.repo_namespace.clone())?;
    let counts = store.get_status_counts()?;
    println!("namespace: {}", config.repo_namespace);
    for status in issueforge_core::model::IssueStatus::ALL {
        println!("{:<10} {}", status.as_str(), counts.get(&status).copied().unwrap_or(0));
    }
    Ok(())
}

fn cmd_run_once(config: &Config, repo_root: &std::path::Path, remote_url: Option<&str>, issue: Option<u64>) -> Result<i32> {
    let repo_slug = repo_slug_for_gh(remote_url, repo_root)?;
    let source = GhIssueSource::new(repo_slug);
    let generator = build_generator(config);
    let mut daemon = Daemon::new(config.clone(), &source, &generator);

    let result = daemon.run_once(issue)?;
    match result.status {
        Some(status) => println!("cycle complete: {status}"),
        None => println!("cycle complete: nothing processed"),
    }
    Ok(0)
}

fn cmd_daemon(config: &Config, repo_root: &std::path::Path, remote_url: Option<&str>) -> Result<i32> {
    let repo_slug = repo_slug_for_gh(remote_url, repo_root)?;
    let source = GhIssueSource::new(repo_slug);
    let generator = build_generator(config);
    let mut daemon = Daemon::new(config.clone(), &source, &generator);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_for_handler.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    daemon.run_forever(&shutdown)?;

    Ok(if shutdown.load(Ordering::SeqCst) { 130 } else { 0 })
}

fn cmd_doctor(config: &Config) -> Result<bool> {
    let mut all_ok = true;
    for (label, cmd) in [("git", "git".to_string()), ("gh", "gh".to_string()), ("generator", config.codex_cmd.clone())] {
        let found = command_exists(&cmd);
        let mark = if found { "ok" } else { "MISSING" };
        println!("{label:<10} {mark:<8} ({cmd})");
        if !found {
            all_ok = false;
            println!("  -> install `{cmd}` and ensure it is on PATH");
        }
    }
    if !config.db_path.parent().map(|p| p.exists()).unwrap_or(true) {
        println!("workdir    MISSING  ({})", config.workdir.display());
        println!("  -> it will be created on first run, or create it now: mkdir -p {}", config.workdir.display());
    }
    Ok(all_ok)
}

fn cmd_clean(config: &Config) -> Result<()> {
    let mut store = Store::open(&config.db_path, config.repo_namespace.clone())?;
    let (issues_deleted, meta_deleted) = store.clear_namespace_state()?;
    println!("cleared {issues_deleted} issue row(s) and {meta_deleted} meta entr(y/ies) for namespace {}", config.repo_namespace);
    Ok(())
}

fn build_generator(config: &Config) -> CodexGenerator {
    CodexGenerator {
        cmd: config.codex_cmd.clone(),
        args: config.codex_args.clone(),
        mode: config.codex_mode.clone(),
        model: config.codex_model.clone(),
        allowed_tools: config.codex_allowed_tools.clone(),
        cost_guard: config.codex_cost_guard.clone(),
    }
}

fn git_remote_url(repo_root: &std::path::Path) -> Option<String> {
    let output = Command::new("git").current_dir(repo_root).args(["remote", "get-url", "origin"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

/// `gh --repo` wants a case-preserving `owner/repo` slug, unlike the
/// lowercase-slugified namespace used for Store partitioning.
fn repo_slug_for_gh(remote_url: Option<&str>, repo_root: &std::path::Path) -> Result<String> {
    let url = remote_url
        .map(str::to_string)
        .or_else(|| git_remote_url(repo_root))
        .with_context(|| format!("no git remote 'origin' found in {}", repo_root.display()))?;

    let trimmed = url.trim().trim_end_matches(".git");
    let slug = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .or_else(|| trimmed.strip_prefix("ssh://git@github.com/"))
        .unwrap_or(trimmed);

    if slug.split('/').count() != 2 {
        anyhow::bail!("could not derive an owner/repo slug from remote url: {url}");
    }
    Ok(slug.to_string())
}

fn command_exists(cmd: &str) -> bool {
    Command::new("sh").arg("-c").arg(format!("command -v {cmd}")).output().map(|o| o.status.success()).unwrap_or(false)
}
