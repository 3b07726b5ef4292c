//! Runtime configuration for the issueforge daemon.
//!
//! Resolution order: **env var > `~/.issueforge/config` file > hardcoded default**.
//!
//! ```text
//! Field                      Env Var                          Default
//! ────────────────────────── ──────────────────────────────── ─────────────────────
//! workdir                    ISSUEFORGE_WORKDIR                ~/.issueforge
//! trigger_label              ISSUEFORGE_TRIGGER_LABEL          "enhancement"
//! base_branch                ISSUEFORGE_BASE_BRANCH            "main"
//! poll_interval_seconds      ISSUEFORGE_POLL_INTERVAL_SECONDS  60
//! codex_timeout_seconds      ISSUEFORGE_CODEX_TIMEOUT_SECONDS  900
//! max_concurrent             ISSUEFORGE_MAX_CONCURRENT         1
//! lease_seconds              ISSUEFORGE_LEASE_SECONDS          2400
//! max_attempts               ISSUEFORGE_MAX_ATTEMPTS           2
//! branch_prefix              ISSUEFORGE_BRANCH_PREFIX          "codex"
//! codex_cmd                  ISSUEFORGE_CODEX_CMD              "codex"
//! max_issues_per_day         ISSUEFORGE_MAX_ISSUES_PER_DAY      10
//! keep_worktree_on_failure   ISSUEFORGE_KEEP_WORKTREE_ON_FAILURE false
//! draft_pr                   ISSUEFORGE_DRAFT_PR               true
//! issue_comment_on_success   ISSUEFORGE_ISSUE_COMMENT_ON_SUCCESS false
//! ```
//!
//! `db_path`, `repo_namespace`, and `worker_id` are always derived, never
//! read from the file/env layer directly (see [`Config::resolve`]).

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Already-resolved configuration the core consumes. Nothing in this
/// struct knows where its values came from — that resolution lives
/// entirely in the CLI-facing loader below.
#[derive(Debug, Clone)]
pub struct Config {
    pub workdir: PathBuf,
    pub db_path: PathBuf,
    /// Root of the source repository the generator operates on (where
    /// worktrees are branched from, via `base_branch`).
    pub repo_root: PathBuf,
    pub repo_namespace: String,
    pub trigger_label: String,
    pub base_branch: String,
    pub poll_interval_seconds: u64,
    pub codex_timeout_seconds: u64,
    pub max_concurrent: usize,
    pub lease_seconds: i64,
    pub max_attempts: u32,
    pub branch_prefix: String,
    pub codex_cmd: String,
    pub codex_args: Vec<String>,
    pub codex_mode: String,
    pub codex_model: Option<String>,
    pub codex_allowed_tools: Option<String>,
    pub codex_cost_guard: Option<String>,
    pub max_issues_per_day: u32,
    pub skip_labels: Vec<String>,
    pub conventions_files: Vec<String>,
    pub keep_worktree_on_failure: bool,
    pub draft_pr: bool,
    pub issue_comment_on_success: bool,
    pub worker_id: String,
}

impl Config {
    /// Build defaults for a given repo root; `repo_namespace` and `worker_id`
    /// still need to be filled in by the caller via [`Self::with_namespace`]
    /// / [`Self::with_worker_id`] once they are known.
    pub fn defaults(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            db_path: workdir.join("state.db"),
            repo_root: PathBuf::from("."),
            repo_namespace: String::new(),
            trigger_label: "enhancement".to_string(),
            base_branch: "main".to_string(),
            poll_interval_seconds: 60,
            codex_timeout_seconds: 900,
            max_concurrent: 1,
            lease_seconds: 2400,
            max_attempts: 2,
            branch_prefix: "codex".to_string(),
            codex_cmd: "codex".to_string(),
            codex_args: Vec::new(),
            codex_mode: "exec".to_string(),
            codex_model: None,
            codex_allowed_tools: None,
            codex_cost_guard: None,
            max_issues_per_day: 10,
            skip_labels: vec!["wontfix".to_string(), "blocked".to_string()],
            conventions_files: vec![
                "AGENTS.md".to_string(),
                "CONTRIBUTING.md".to_string(),
                "README.md".to_string(),
            ],
            keep_worktree_on_failure: false,
            draft_pr: true,
            issue_comment_on_success: false,
            worker_id: String::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.repo_namespace = namespace.into();
        self
    }

    pub fn with_repo_root(mut self, repo_root: impl Into<PathBuf>) -> Self {
        self.repo_root = repo_root.into();
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Load config from env vars, `<workdir>/config` file, and hardcoded
    /// defaults. `workdir` is resolved first (env/file/default on itself),
    /// since the config file lives inside it.
    pub fn load(workdir_override: Option<&Path>) -> Result<Self> {
        Self::load_with_env(workdir_override, |k| env::var(k).ok())
    }

    fn load_with_env(
        workdir_override: Option<&Path>,
        get_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let default_workdir = dirs_home().join(".issueforge");
        let workdir = workdir_override
            .map(|p| p.to_path_buf())
            .or_else(|| get_env("ISSUEFORGE_WORKDIR").map(PathBuf::from))
            .unwrap_or(default_workdir);

        let mut cfg = Self::defaults(&workdir);

        let config_file = workdir.join("config");
        if config_file.exists() {
            parse_config_file(&config_file, |key, value| {
                cfg.apply_file_entry(key, value);
            })?;
        }

        cfg.apply_env_overrides(&get_env);
        Ok(cfg)
    }

    fn apply_file_entry(&mut self, key: &str, value: &str) {
        self.apply_entry(key, value);
    }

    fn apply_env_overrides(&mut self, get_env: &impl Fn(&str) -> Option<String>) {
        const FIELDS: &[&str] = &[
            "TRIGGER_LABEL",
            "BASE_BRANCH",
            "POLL_INTERVAL_SECONDS",
            "CODEX_TIMEOUT_SECONDS",
            "MAX_CONCURRENT",
            "LEASE_SECONDS",
            "MAX_ATTEMPTS",
            "BRANCH_PREFIX",
            "CODEX_CMD",
            "CODEX_MODE",
            "CODEX_MODEL",
            "CODEX_ALLOWED_TOOLS",
            "CODEX_COST_GUARD",
            "MAX_ISSUES_PER_DAY",
            "KEEP_WORKTREE_ON_FAILURE",
            "DRAFT_PR",
            "ISSUE_COMMENT_ON_SUCCESS",
        ];
        for field in FIELDS {
            if let Some(value) = get_env(&format!("ISSUEFORGE_{field}")) {
                self.apply_entry(&field.to_lowercase(), &value);
            }
        }
    }

    fn apply_entry(&mut self, key: &str, value: &str) {
        match key {
            "trigger_label" => self.trigger_label = value.to_string(),
            "base_branch" => self.base_branch = value.to_string(),
            "poll_interval_seconds" => {
                if let Ok(n) = value.parse() {
                    self.poll_interval_seconds = n;
                }
            }
            "codex_timeout_seconds" => {
                if let Ok(n) = value.parse() {
                    self.codex_timeout_seconds = n;
                }
            }
            "max_concurrent" => {
                if let Ok(n) = value.parse() {
                    self.max_concurrent = n;
                }
            }
            "lease_seconds" => {
                if let Ok(n) = value.parse() {
                    self.lease_seconds = n;
                }
            }
            "max_attempts" => {
                if let Ok(n) = value.parse() {
                    self.max_attempts = n;
                }
            }
            "branch_prefix" => self.branch_prefix = value.to_string(),
            "codex_cmd" => self.codex_cmd = value.to_string(),
            "codex_mode" => self.codex_mode = value.to_string(),
            "codex_model" => self.codex_model = Some(value.to_string()),
            "codex_allowed_tools" => self.codex_allowed_tools = Some(value.to_string()),
            "codex_cost_guard" => self.codex_cost_guard = Some(value.to_string()),
            "max_issues_per_day" => {
                if let Ok(n) = value.parse() {
                    self.max_issues_per_day = n;
                }
            }
            "skip_labels" => {
                self.skip_labels = value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
            "conventions_files" => {
                self.conventions_files = value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
            "keep_worktree_on_failure" => self.keep_worktree_on_failure = parse_bool(value),
            "draft_pr" => self.draft_pr = parse_bool(value),
            "issue_comment_on_success" => self.issue_comment_on_success = parse_bool(value),
            _ => {}
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes" | "on")
}

fn dirs_home() -> PathBuf {
    env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Parse a `key=value` file, one entry per line; blank lines and lines
/// starting with `#` are ignored. Mirrors the flat config-file format
/// used throughout the rest of the crate's CLI-facing state.
fn parse_config_file(path: &Path, mut apply: impl FnMut(&str, &str)) -> Result<()> {
    let content = fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let value = line[eq_pos + 1..].trim();
            apply(key, value);
        }
    }
    Ok(())
}
