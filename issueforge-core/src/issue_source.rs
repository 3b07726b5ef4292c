//! The `IssueSource` collaborator contract (§6): lists and fetches issues,
//! lists and creates pull requests, and posts issue comments. The shipped
//! adapter (`github::GhIssueSource`) shells out to the `gh` CLI; tests use
//! a hand-rolled mock.

use crate::error::UpstreamError;
use crate::model::{IssueDetails, PolledIssue};

/// A pull request found by head branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub number: u64,
    pub url: String,
}

/// Everything the Poller and Runner need from the hosting platform.
/// Every operation may fail with an [`UpstreamError`] carrying the
/// underlying command's exit status and output.
pub trait IssueSource {
    /// Up to 100 most-recently-updated open issues carrying `label`.
    fn list_candidates(&self, label: &str) -> Result<Vec<PolledIssue>, UpstreamError>;

    /// Full issue detail, including body and open/closed state.
    fn fetch_issue(&self, id: u64) -> Result<IssueDetails, UpstreamError>;

    /// Open pull requests whose head branch matches `branch`.
    fn find_prs_by_branch(&self, branch: &str) -> Result<Vec<PrRef>, UpstreamError>;

    /// Create a pull request; returns its (possibly unresolved) number/url.
    fn create_pr(&self, head: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRef, UpstreamError>;

    /// Post a comment on an issue.
    fn comment_on_issue(&self, id: u64, body: &str) -> Result<(), UpstreamError>;
}
