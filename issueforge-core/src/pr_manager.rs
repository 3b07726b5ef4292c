//! Idempotent pull-request creation for a published branch (§4.4).

use crate::issue_source::IssueSource;
use crate::model::{Issue, PrInfo, RunnerResult};

pub struct PrManager<'a> {
    pub issue_source: &'a dyn IssueSource,
}

impl<'a> PrManager<'a> {
    pub fn new(issue_source: &'a dyn IssueSource) -> Self {
        Self { issue_source }
    }

    pub fn ensure_pr(&self, issue: &Issue, runner_result: &RunnerResult, base_branch: &str, draft_pr: bool, issue_comment_on_success: bool) -> anyhow::Result<PrInfo> {
        let branch = runner_result
            .branch
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ensure_pr called without a published branch"))?;

        let existing = self.issue_source.find_prs_by_branch(branch)?;
        if let Some(pr) = existing.into_iter().next() {
            return Ok(PrInfo { number: Some(pr.number), url: Some(pr.url), created: false });
        }

        let title = format!("[Codex] {}", issue.title.trim());
        let body = format!(
            "Fixes #{}\n\n### What Changed\n- Automated implementation generated in a dedicated Codex worktree.\n\n### How To Verify\n- Review the PR diff and run project tests/linters.",
            issue.id
        );
        let created = self.issue_source.create_pr(branch, base_branch, &title, &body, draft_pr)?;

        let (number, url) = if created.number != 0 {
            (Some(created.number), Some(created.url))
        } else {
            let refreshed = self.issue_source.find_prs_by_branch(branch)?;
            match refreshed.into_iter().next() {
                Some(pr) => (Some(pr.number), Some(pr.url)),
                None => (None, Some(created.url)),
            }
        };

        if issue_comment_on_success {
            if let Some(url) = &url {
                let _ = self.issue_source.comment_on_issue(issue.id, &format!("Opened pull request: {url}"));
            }
        }

        Ok(PrInfo { number, url, created: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::issue_source::PrRef;
    use crate::model::{IssueDetails, IssueState, IssueStatus, PolledIssue, RunnerStatus};
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct MockSource {
        prs_by_branch: RefCell<Vec<PrRef>>,
        created: RefCell<Vec<(String, String, String, String, bool)>>,
        comments: RefCell<Vec<(u64, String)>>,
    }

    impl IssueSource for MockSource {
        fn list_candidates(&self, _label: &str) -> Result<Vec<PolledIssue>, UpstreamError> {
            Ok(vec![])
        }
        fn fetch_issue(&self, id: u64) -> Result<IssueDetails, UpstreamError> {
            Ok(IssueDetails { id, title: String::new(), body: None, url: None, labels: vec![], state: IssueState::Open })
        }
        fn find_prs_by_branch(&self, branch: &str) -> Result<Vec<PrRef>, UpstreamError> {
            Ok(self.prs_by_branch.borrow().iter().filter(|_| branch == "codex/issue-7").cloned().collect())
        }
        fn create_pr(&self, head: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRef, UpstreamError> {
            self.created.borrow_mut().push((head.to_string(), base.to_string(), title.to_string(), body.to_string(), draft));
            Ok(PrRef { number: 42, url: "https://example.com/pull/42".to_string() })
        }
        fn comment_on_issue(&self, id: u64, body: &str) -> Result<(), UpstreamError> {
            self.comments.borrow_mut().push((id, body.to_string()));
            Ok(())
        }
    }

    fn issue() -> Issue {
        Issue {
            namespace: "ns".into(),
            id: 7,
            title: "Add feature".into(),
            body: None,
            url: None,
            labels: vec![],
            status: IssueStatus::Running,
            attempt_count: 1,
            updated_at: None,
            lease_until: None,
            claimed_by: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            completed_at: None,
            branch: None,
            pr_number: None,
            pr_url: None,
            head_sha: None,
            last_error: None,
            last_run_dir: None,
        }
    }

    fn result() -> RunnerResult {
        RunnerResult {
            status: RunnerStatus::Pushed,
            branch: Some("codex/issue-7".into()),
            run_dir: PathBuf::from("/tmp/run"),
            head_sha: Some("abc123".into()),
            error: None,
            exit_code: Some(0),
        }
    }

    #[test]
    fn creates_a_draft_pr_when_none_exists() {
        let source = MockSource { prs_by_branch: RefCell::new(vec![]), created: RefCell::new(vec![]), comments: RefCell::new(vec![]) };
        let manager = PrManager::new(&source);
        let pr = manager.ensure_pr(&issue(), &result(), "main", true, false).unwrap();

        assert_eq!(pr.number, Some(42));
        assert!(pr.created);
        let created = source.created.borrow();
        assert_eq!(created[0].4, true);
        assert!(created[0].2.starts_with("[Codex]"));
        assert!(created[0].3.starts_with("Fixes #7"));
    }

    #[test]
    fn ensure_pr_is_idempotent_for_existing_branch() {
        let source = MockSource {
            prs_by_branch: RefCell::new(vec![PrRef { number: 99, url: "https://example.com/pull/99".into() }]),
            created: RefCell::new(vec![]),
            comments: RefCell::new(vec![]),
        };
        let manager = PrManager::new(&source);

        let first = manager.ensure_pr(&issue(), &result(), "main", true, false).unwrap();
        let second = manager.ensure_pr(&issue(), &result(), "main", true, false).unwrap();

        assert_eq!(first, second);
        assert!(!first.created);
        assert!(source.created.borrow().is_empty());
    }

    #[test]
    fn comments_on_issue_when_configured_and_successful() {
        let source = MockSource { prs_by_branch: RefCell::new(vec![]), created: RefCell::new(vec![]), comments: RefCell::new(vec![]) };
        let manager = PrManager::new(&source);
        manager.ensure_pr(&issue(), &result(), "main", true, true).unwrap();

        let comments = source.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, 7);
        assert!(comments[0].1.contains("https://example.com/pull/42"));
    }
}
