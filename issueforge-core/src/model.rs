//! Record types shared across the Store, Poller, Runner, and Daemon.

use std::fmt;

/// Lifecycle status of an issue row.
///
/// State machine:
///   pending → running → done | skipped | timeout | failed
///   running → pending (lease expiry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueStatus {
    Pending,
    Running,
    Done,
    Failed,
    Timeout,
    Skipped,
}

impl IssueStatus {
    /// Whether this status represents a terminal (final) state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Timeout | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// All terminal statuses, in the order status reports display them.
    pub const ALL: [IssueStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::Timeout,
        Self::Skipped,
    ];
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label attached to an upstream issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
}

/// The row stored per `(namespace, id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub namespace: String,
    pub id: u64,
    pub title: String,
    pub body: Option<String>,
    pub url: Option<String>,
    pub labels: Vec<String>,
    pub status: IssueStatus,
    pub attempt_count: u32,
    pub updated_at: Option<String>,
    pub lease_until: Option<String>,
    pub claimed_by: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub branch: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub head_sha: Option<String>,
    pub last_error: Option<String>,
    pub last_run_dir: Option<String>,
}

impl Issue {
    /// `true` when both lease fields are cleared, matching the invariant
    /// `status ∈ terminal ⇔ lease_until = claimed_by = null`.
    pub fn lease_is_clear(&self) -> bool {
        self.lease_until.is_none() && self.claimed_by.is_none()
    }
}

/// One entry from `IssueSource::list_candidates`, normalised for `upsert_polled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledIssue {
    pub id: u64,
    pub title: String,
    pub url: Option<String>,
    pub labels: Vec<String>,
    pub updated_at: Option<String>,
}

/// The fuller record fetched during Runner preflight; only descriptive
/// fields are present, never status/lease/publication fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDetails {
    pub id: u64,
    pub title: String,
    pub body: Option<String>,
    pub url: Option<String>,
    pub labels: Vec<String>,
    pub state: IssueState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

/// Result of an `ensure_pr` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrInfo {
    pub number: Option<u64>,
    pub url: Option<String>,
    pub created: bool,
}

/// Outcome of one claimed issue passing through the Runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerResult {
    pub status: RunnerStatus,
    pub branch: Option<String>,
    pub run_dir: std::path::PathBuf,
    pub head_sha: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

/// Terminal outcome reported by the Runner. `Pushed` is the one outcome the
/// Daemon maps onto `IssueStatus::Done` after `PRManager::ensure_pr` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Pushed,
    Skipped,
    Failed,
    Timeout,
}

impl RunnerStatus {
    pub fn as_issue_status(self) -> IssueStatus {
        match self {
            Self::Pushed => IssueStatus::Done,
            Self::Skipped => IssueStatus::Skipped,
            Self::Failed => IssueStatus::Failed,
            Self::Timeout => IssueStatus::Timeout,
        }
    }
}

/// Result of one Daemon cycle, aggregated across however many issues
/// were claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResult {
    pub processed: bool,
    pub status: Option<IssueStatus>,
}

impl CycleResult {
    pub fn empty() -> Self {
        Self { processed: false, status: None }
    }

    /// Aggregate a batch of per-issue terminal statuses per the precedence
    /// `done > skipped > timeout > failed`.
    pub fn aggregate(statuses: &[IssueStatus]) -> Self {
        if statuses.is_empty() {
            return Self::empty();
        }
        let status = if statuses.contains(&IssueStatus::Done) {
            IssueStatus::Done
        } else if statuses.contains(&IssueStatus::Skipped) {
            IssueStatus::Skipped
        } else if statuses.contains(&IssueStatus::Timeout) {
            IssueStatus::Timeout
        } else {
            IssueStatus::Failed
        };
        Self { processed: true, status: Some(status) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_valid_statuses() {
        for status in IssueStatus::ALL {
            assert_eq!(IssueStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn parse_unknown_returns_none() {
        assert_eq!(IssueStatus::parse(""), None);
        assert_eq!(IssueStatus::parse("queued"), None);
        assert_eq!(IssueStatus::parse("DONE"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!IssueStatus::Pending.is_terminal());
        assert!(!IssueStatus::Running.is_terminal());
        assert!(IssueStatus::Done.is_terminal());
        assert!(IssueStatus::Failed.is_terminal());
        assert!(IssueStatus::Timeout.is_terminal());
        assert!(IssueStatus::Skipped.is_terminal());
    }

    #[test]
    fn aggregate_prefers_done_over_everything() {
        let statuses = [IssueStatus::Failed, IssueStatus::Timeout, IssueStatus::Done];
        assert_eq!(CycleResult::aggregate(&statuses).status, Some(IssueStatus::Done));
    }

    #[test]
    fn aggregate_prefers_skipped_over_timeout_and_failed() {
        let statuses = [IssueStatus::Failed, IssueStatus::Timeout, IssueStatus::Skipped];
        assert_eq!(CycleResult::aggregate(&statuses).status, Some(IssueStatus::Skipped));
    }

    #[test]
    fn aggregate_falls_back_to_failed() {
        let statuses = [IssueStatus::Failed, IssueStatus::Failed];
        assert_eq!(CycleResult::aggregate(&statuses).status, Some(IssueStatus::Failed));
    }

    #[test]
    fn aggregate_of_empty_batch_is_unprocessed() {
        assert_eq!(CycleResult::aggregate(&[]), CycleResult::empty());
    }
}
