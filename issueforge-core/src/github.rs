//! `gh`-CLI-backed [`IssueSource`] adapter, following the same
//! `std::process::Command` + JSON-parsing idiom used everywhere else
//! subprocess output needs to cross into a typed record.

use std::process::Command;

use crate::error::UpstreamError;
use crate::issue_source::{IssueSource, PrRef};
use crate::model::{IssueDetails, IssueState, PolledIssue};

/// Invokes the `gh` CLI against a single `owner/repo` slug.
pub struct GhIssueSource {
    repo: String,
}

impl GhIssueSource {
    pub fn new(repo: impl Into<String>) -> Self {
        Self { repo: repo.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String, UpstreamError> {
        let output = Command::new("gh")
            .args(args)
            .output()
            .map_err(|e| UpstreamError::new(format!("gh {}", args.join(" ")), None, "", e.to_string()))?;

        if !output.status.success() {
            return Err(UpstreamError::new(
                format!("gh {}", args.join(" ")),
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl IssueSource for GhIssueSource {
    fn list_candidates(&self, label: &str) -> Result<Vec<PolledIssue>, UpstreamError> {
        let search = format!("is:issue is:open label:{label} sort:updated-desc");
        let stdout = self.run(&[
            "issue",
            "list",
            "--repo",
            &self.repo,
            "--search",
            &search,
            "--limit",
            "100",
            "--json",
            "number,title,url,labels,updatedAt,createdAt",
        ])?;

        let parsed: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| UpstreamError::new("gh issue list", None, stdout.clone(), e.to_string()))?;

        let mut issues = Vec::new();
        if let Some(arr) = parsed.as_array() {
            for item in arr {
                let id = item.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
                let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let url = item.get("url").and_then(|v| v.as_str()).map(str::to_string);
                let updated_at = item.get("updatedAt").and_then(|v| v.as_str()).map(str::to_string);
                let labels = item
                    .get("labels")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|l| l.get("name").and_then(|n| n.as_str()).map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                issues.push(PolledIssue { id, title, url, labels, updated_at });
            }
        }
        Ok(issues)
    }

    fn fetch_issue(&self, id: u64) -> Result<IssueDetails, UpstreamError> {
        let id_str = id.to_string();
        let stdout = self.run(&[
            "issue",
            "view",
            &id_str,
            "--repo",
            &self.repo,
            "--json",
            "number,title,body,url,labels,state",
        ])?;

        let parsed: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| UpstreamError::new("gh issue view", None, stdout.clone(), e.to_string()))?;

        let title = parsed.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let body = parsed.get("body").and_then(|v| v.as_str()).map(str::to_string);
        let url = parsed.get("url").and_then(|v| v.as_str()).map(str::to_string);
        let labels = parsed
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| l.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let state = match parsed.get("state").and_then(|v| v.as_str()) {
            Some("CLOSED") => IssueState::Closed,
            _ => IssueState::Open,
        };

        Ok(IssueDetails { id, title, body, url, labels, state })
    }

    fn find_prs_by_branch(&self, branch: &str) -> Result<Vec<PrRef>, UpstreamError> {
        let stdout = self.run(&[
            "pr",
            "list",
            "--repo",
            &self.repo,
            "--head",
            branch,
            "--state",
            "open",
            "--json",
            "number,url",
        ])?;

        let parsed: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| UpstreamError::new("gh pr list", None, stdout.clone(), e.to_string()))?;

        let mut prs = Vec::new();
        if let Some(arr) = parsed.as_array() {
            for item in arr {
                let number = item.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
                let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
                prs.push(PrRef { number, url });
            }
        }
        Ok(prs)
    }

    fn create_pr(&self, head: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRef, UpstreamError> {
        let mut args = vec![
            "pr".to_string(),
            "create".to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--head".to_string(),
            head.to_string(),
            "--base".to_string(),
            base.to_string(),
            "--title".to_string(),
            title.to_string(),
            "--body".to_string(),
            body.to_string(),
        ];
        if draft {
            args.push("--draft".to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&arg_refs)?;

        // Re-query to resolve number/url authoritatively; fall back to
        // parsing the creation output's `/pull/<n>/` pattern on miss.
        if let Ok(mut found) = self.find_prs_by_branch(head) {
            if !found.is_empty() {
                return Ok(found.remove(0));
            }
        }

        let number = parse_pr_number_from_output(&stdout).unwrap_or(0);
        Ok(PrRef { number, url: stdout.trim().to_string() })
    }

    fn comment_on_issue(&self, id: u64, body: &str) -> Result<(), UpstreamError> {
        let id_str = id.to_string();
        self.run(&["issue", "comment", &id_str, "--repo", &self.repo, "--body", body])?;
        Ok(())
    }
}

/// Extract the PR number from a `.../pull/<n>/` style URL or output line.
fn parse_pr_number_from_output(output: &str) -> Option<u64> {
    let marker = "/pull/";
    let pos = output.find(marker)?;
    let after = &output[pos + marker.len()..];
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pr_number_from_creation_url() {
        assert_eq!(parse_pr_number_from_output("https://github.com/o/r/pull/42/files"), Some(42));
        assert_eq!(parse_pr_number_from_output("https://github.com/o/r/pull/7\n"), Some(7));
    }

    #[test]
    fn returns_none_when_no_pull_marker_present() {
        assert_eq!(parse_pr_number_from_output("no pr link here"), None);
    }
}
