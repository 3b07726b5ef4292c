//! The control loop (§4.5, §5): polling, claim fan-out, rate limiting,
//! back-off under upstream failure, and cooperative shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, info_span, warn};

use crate::config::Config;
use crate::generator::Generator;
use crate::issue_source::IssueSource;
use crate::model::{CycleResult, Issue, IssueStatus};
use crate::poller::Poller;
use crate::pr_manager::PrManager;
use crate::runner::Runner;
use crate::store::Store;

const BACKOFF_CAP_SECONDS: u64 = 300;

pub struct Daemon<'a> {
    config: Config,
    worker_id: String,
    issue_source: &'a (dyn IssueSource + Sync),
    generator: &'a (dyn Generator + Sync),
    current_backoff: u64,
    consecutive_terminal_failures: u32,
}

impl<'a> Daemon<'a> {
    pub fn new(config: Config, issue_source: &'a (dyn IssueSource + Sync), generator: &'a (dyn Generator + Sync)) -> Self {
        let worker_id = if config.worker_id.is_empty() { default_worker_id() } else { config.worker_id.clone() };
        let poll_interval = config.poll_interval_seconds;
        Self { config, worker_id, issue_source, generator, current_backoff: poll_interval, consecutive_terminal_failures: 0 }
    }

    fn open_store(&self) -> anyhow::Result<Store> {
        Store::open(&self.config.db_path, self.config.repo_namespace.clone())
    }

    /// Execute one cycle. When `issue_id` is given, bypasses the daily cap
    /// and targets exactly that issue (§4.5 "Requested-issue mode").
    pub fn run_once(&mut self, issue_id: Option<u64>) -> anyhow::Result<CycleResult> {
        let mut store = self.open_store()?;
        let _span = info_span!("cycle", namespace = %self.config.repo_namespace).entered();

        let poller = Poller::new(self.issue_source);
        let polled = poller.poll_and_upsert(&mut store, &self.config.trigger_label)?;
        info!(polled, "poll complete");

        let requeued = store.requeue_expired_leases()?;
        if requeued > 0 {
            info!(requeued, "requeued expired leases");
        }

        if let Some(id) = issue_id {
            return self.run_requested_issue(&mut store, id);
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let done_count = store.get_daily_done_count(&today)?;
        let daily_remaining = self.config.max_issues_per_day as i64 - done_count as i64;
        if daily_remaining <= 0 {
            info!("daily issue limit reached");
            return Ok(CycleResult::empty());
        }

        let claim_limit = (self.config.max_concurrent.max(1) as i64).min(daily_remaining) as usize;
        let mut claimed = Vec::with_capacity(claim_limit);
        for _ in 0..claim_limit {
            match store.claim_next_pending(&self.worker_id, self.config.max_attempts, self.config.lease_seconds)? {
                Some(issue) => claimed.push(issue),
                None => break,
            }
        }

        if claimed.is_empty() {
            return Ok(CycleResult::empty());
        }

        let statuses = if claimed.len() == 1 && self.config.max_concurrent <= 1 {
            vec![self.process_and_finalize(&mut store, &claimed[0])?]
        } else {
            self.process_batch(claimed)?
        };

        Ok(CycleResult::aggregate(&statuses))
    }

    fn run_requested_issue(&mut self, store: &mut Store, id: u64) -> anyhow::Result<CycleResult> {
        let mut claimed = store.claim_pending_by_id(id, &self.worker_id, self.config.max_attempts, self.config.lease_seconds)?;

        if claimed.is_none() {
            let details = self.issue_source.fetch_issue(id)?;
            let polled = crate::model::PolledIssue { id, title: details.title.clone(), url: details.url.clone(), labels: details.labels.clone(), updated_at: None };
            store.upsert_polled(&[polled])?;
            claimed = store.claim_pending_by_id(id, &self.worker_id, self.config.max_attempts, self.config.lease_seconds)?;
        }

        let Some(issue) = claimed else {
            return Ok(CycleResult::empty());
        };

        let status = self.process_and_finalize(store, &issue)?;
        Ok(CycleResult { processed: true, status: Some(status) })
    }

    /// Dispatch up to `max_concurrent` parallel workers, each opening its
    /// own Store handle (§9 "Per-worker Store handles").
    fn process_batch(&self, claimed: Vec<Issue>) -> anyhow::Result<Vec<IssueStatus>> {
        let mut statuses = Vec::with_capacity(claimed.len());
        thread::scope(|scope| {
            let handles: Vec<_> = claimed
                .into_iter()
                .map(|issue| {
                    scope.spawn(move || {
                        let mut store = match self.open_store() {
                            Ok(s) => s,
                            Err(e) => {
                                error!(issue_id = issue.id, error = %e, "failed to open worker store handle");
                                return IssueStatus::Failed;
                            }
                        };
                        self.process_and_finalize(&mut store, &issue).unwrap_or(IssueStatus::Failed)
                    })
                })
                .collect();
            for handle in handles {
                statuses.push(handle.join().unwrap_or(IssueStatus::Failed));
            }
        });
        Ok(statuses)
    }

    /// Run the Runner pipeline for one claimed issue, then write the
    /// terminal state. Any otherwise-unhandled error is the `Fatal` case
    /// (§7): caught here, logged with its full cause chain, and turned
    /// into a `failed` row rather than aborting the caller.
    fn process_and_finalize(&self, store: &mut Store, issue: &Issue) -> anyhow::Result<IssueStatus> {
        let _span = info_span!("issue", issue_id = issue.id, worker_id = %self.worker_id).entered();

        let runner = Runner { issue_source: self.issue_source, generator: self.generator, config: &self.config };
        let result = match runner.process(store, issue) {
            Ok(r) => r,
            Err(e) => {
                error!(issue_id = issue.id, error = format!("{e:#}"), "fatal error in runner pipeline");
                store.mark_failed(issue.id, &e.to_string())?;
                return Ok(IssueStatus::Failed);
            }
        };

        match result.status {
            crate::model::RunnerStatus::Pushed => {
                let pr_manager = PrManager::new(self.issue_source);
                let pr = pr_manager.ensure_pr(issue, &result, &self.config.base_branch, self.config.draft_pr, self.config.issue_comment_on_success)?;
                let branch = result.branch.as_deref().unwrap_or_default();
                store.mark_done(issue.id, branch, pr.number, pr.url.as_deref(), result.head_sha.as_deref())?;
                let today = Utc::now().format("%Y-%m-%d").to_string();
                store.increment_daily_done_count(&today)?;
                info!(issue_id = issue.id, branch, pr_number = ?pr.number, "issue done");
                Ok(IssueStatus::Done)
            }
            crate::model::RunnerStatus::Skipped => {
                store.mark_skipped(issue.id, result.error.as_deref().unwrap_or("skipped"))?;
                Ok(IssueStatus::Skipped)
            }
            crate::model::RunnerStatus::Timeout => {
                store.mark_timeout(issue.id, result.error.as_deref().unwrap_or("timed out"))?;
                Ok(IssueStatus::Timeout)
            }
            crate::model::RunnerStatus::Failed => {
                store.mark_failed(issue.id, result.error.as_deref().unwrap_or("failed"))?;
                Ok(IssueStatus::Failed)
            }
        }
    }

    /// Loop until `shutdown` is observed, applying exponential back-off
    /// on upstream failure and an interruptible sleep between cycles.
    pub fn run_forever(&mut self, shutdown: &Arc<AtomicBool>) -> anyhow::Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, exiting control loop");
                return Ok(());
            }

            let upstream_failed = match self.run_once(None) {
                Ok(result) => {
                    let is_terminal_failure = matches!(result.status, Some(IssueStatus::Failed) | Some(IssueStatus::Timeout));
                    if is_terminal_failure {
                        self.consecutive_terminal_failures += 1;
                    } else {
                        self.consecutive_terminal_failures = 0;
                        self.current_backoff = self.config.poll_interval_seconds;
                    }
                    false
                }
                Err(e) => {
                    warn!(error = format!("{e:#}"), "upstream error in cycle, backing off");
                    true
                }
            };

            // Sleep on the current backoff first, then double it for the
            // next failure, matching the original's min-then-double order.
            let sleep_seconds = if self.consecutive_terminal_failures >= 3 {
                (self.config.poll_interval_seconds * 3).min(BACKOFF_CAP_SECONDS)
            } else {
                self.current_backoff.min(BACKOFF_CAP_SECONDS)
            };

            if upstream_failed {
                self.current_backoff = (self.current_backoff * 2).min(BACKOFF_CAP_SECONDS);
            }

            if !interruptible_sleep(sleep_seconds, shutdown) {
                info!("shutdown requested during sleep, exiting control loop");
                return Ok(());
            }
        }
    }
}

/// Sleep in 1-second slices so a shutdown flag can interrupt it (§5).
/// Returns `false` if shutdown was observed before the sleep completed.
fn interruptible_sleep(total_seconds: u64, shutdown: &Arc<AtomicBool>) -> bool {
    for _ in 0..total_seconds {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(Duration::from_secs(1));
    }
    !shutdown.load(Ordering::SeqCst)
}

fn default_worker_id() -> String {
    let hostname = hostname();
    format!("{hostname}-{}", std::process::id())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").ok().unwrap_or_else(|| "localhost".to_string())
}
