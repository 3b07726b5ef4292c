//! Pulls the candidate list from an [`IssueSource`] and upserts it into
//! the [`Store`]. Never marks anything terminal — stale rows remain in
//! whatever state they last reached.

use tracing::info;

use crate::issue_source::IssueSource;
use crate::store::Store;

pub struct Poller<'a> {
    source: &'a dyn IssueSource,
}

impl<'a> Poller<'a> {
    pub fn new(source: &'a dyn IssueSource) -> Self {
        Self { source }
    }

    /// Fetch candidates labelled `trigger_label` and upsert them. Returns
    /// the number fetched.
    pub fn poll_and_upsert(&self, store: &mut Store, trigger_label: &str) -> anyhow::Result<usize> {
        let candidates = self.source.list_candidates(trigger_label)?;
        let count = candidates.len();
        store.upsert_polled(&candidates)?;
        info!(count, trigger_label, "polled candidates");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::issue_source::PrRef;
    use crate::model::{IssueDetails, IssueState, PolledIssue};
    use std::cell::RefCell;

    struct MockSource {
        candidates: Vec<PolledIssue>,
        calls: RefCell<Vec<String>>,
    }

    impl IssueSource for MockSource {
        fn list_candidates(&self, label: &str) -> Result<Vec<PolledIssue>, UpstreamError> {
            self.calls.borrow_mut().push(label.to_string());
            Ok(self.candidates.clone())
        }
        fn fetch_issue(&self, id: u64) -> Result<IssueDetails, UpstreamError> {
            Ok(IssueDetails { id, title: String::new(), body: None, url: None, labels: vec![], state: IssueState::Open })
        }
        fn find_prs_by_branch(&self, _branch: &str) -> Result<Vec<PrRef>, UpstreamError> {
            Ok(vec![])
        }
        fn create_pr(&self, _h: &str, _b: &str, _t: &str, _body: &str, _draft: bool) -> Result<PrRef, UpstreamError> {
            unimplemented!()
        }
        fn comment_on_issue(&self, _id: u64, _body: &str) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    #[test]
    fn poll_and_upsert_forwards_trigger_label_and_stores_rows() {
        let source = MockSource {
            candidates: vec![PolledIssue { id: 1, title: "fix it".into(), url: None, labels: vec!["enhancement".into()], updated_at: None }],
            calls: RefCell::new(vec![]),
        };
        let poller = Poller::new(&source);
        let mut store = Store::open_in_memory("ns").unwrap();

        let count = poller.poll_and_upsert(&mut store, "enhancement").unwrap();

        assert_eq!(count, 1);
        assert_eq!(source.calls.borrow().as_slice(), ["enhancement"]);
        assert!(store.get(1).unwrap().is_some());
    }
}
