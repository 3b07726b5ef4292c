//! The durable, lease-based work queue (§4.1). Backed by an embedded
//! SQLite database opened in WAL mode; every mutation runs inside a
//! `BEGIN IMMEDIATE` transaction so concurrent Store handles (one per
//! worker, per the design notes) serialise cleanly on the same file.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::model::{Issue, IssueDetails, IssueState, IssueStatus, PolledIssue};

const SCHEMA_VERSION: i64 = 2;

pub struct Store {
    conn: Connection,
    namespace: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl Store {
    /// Open (creating if absent) the database at `db_path`, scoped to
    /// `namespace`. Runs schema migration if needed.
    pub fn open(db_path: &Path, namespace: impl Into<String>) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;

        let mut store = Self { conn, namespace: namespace.into() };
        store.migrate()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory(namespace: impl Into<String>) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let mut store = Self { conn, namespace: namespace.into() };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> anyhow::Result<()> {
        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        let namespace = self.namespace.clone();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let legacy_exists: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='issues'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        let legacy_is_old_shape = legacy_exists
            && tx
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('issues') WHERE name='namespace'",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n == 0)?;

        if legacy_is_old_shape {
            tx.execute("ALTER TABLE issues RENAME TO issues_legacy", [])?;
        }

        let legacy_meta_exists: bool = tx
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='meta'", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n > 0)?;
        let legacy_meta_is_old_shape = legacy_meta_exists
            && tx
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('meta') WHERE name='namespace'",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n == 0)?;

        if legacy_meta_is_old_shape {
            tx.execute("ALTER TABLE meta RENAME TO meta_legacy", [])?;
        }

        tx.execute(
            "CREATE TABLE IF NOT EXISTS issues (
                namespace TEXT NOT NULL,
                id INTEGER NOT NULL,
                title TEXT NOT NULL,
                body TEXT,
                url TEXT,
                labels_json TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT,
                lease_until TEXT,
                claimed_by TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                branch TEXT,
                pr_number INTEGER,
                pr_url TEXT,
                head_sha TEXT,
                last_error TEXT,
                last_run_dir TEXT,
                PRIMARY KEY (namespace, id)
            )",
            [],
        )?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;

        tx.execute(
            "CREATE TABLE IF NOT EXISTS schema_meta (id INTEGER PRIMARY KEY CHECK (id = 0), version INTEGER NOT NULL)",
            [],
        )?;

        if legacy_is_old_shape {
            tx.execute(
                "INSERT INTO issues (
                    namespace, id, title, body, url, labels_json, status, attempt_count,
                    updated_at, lease_until, claimed_by, created_at, started_at, completed_at,
                    branch, pr_number, pr_url, head_sha, last_error, last_run_dir
                )
                SELECT ?1, id, title, body, url, labels_json, status, attempt_count,
                    updated_at, lease_until, claimed_by, created_at, started_at, completed_at,
                    branch, pr_number, pr_url, head_sha, last_error, last_run_dir
                FROM issues_legacy",
                params![namespace],
            )?;
        }

        if legacy_meta_is_old_shape {
            tx.execute(
                "INSERT INTO meta (namespace, key, value) SELECT ?1, key, value FROM meta_legacy",
                params![namespace],
            )?;
        }

        tx.execute(
            "INSERT INTO schema_meta (id, version) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            params![SCHEMA_VERSION],
        )?;

        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_issue(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
        let labels_json: String = row.get("labels_json")?;
        let labels: Vec<String> = serde_json::from_str(&labels_json).unwrap_or_default();
        let status_str: String = row.get("status")?;
        Ok(Issue {
            namespace: row.get("namespace")?,
            id: row.get::<_, i64>("id")? as u64,
            title: row.get("title")?,
            body: row.get("body")?,
            url: row.get("url")?,
            labels,
            status: IssueStatus::parse(&status_str).unwrap_or(IssueStatus::Failed),
            attempt_count: row.get::<_, i64>("attempt_count")? as u32,
            updated_at: row.get("updated_at")?,
            lease_until: row.get("lease_until")?,
            claimed_by: row.get("claimed_by")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            branch: row.get("branch")?,
            pr_number: row.get::<_, Option<i64>>("pr_number")?.map(|n| n as u64),
            pr_url: row.get("pr_url")?,
            head_sha: row.get("head_sha")?,
            last_error: row.get("last_error")?,
            last_run_dir: row.get("last_run_dir")?,
        })
    }

    /// Insert `pending` rows for issues not yet seen; refresh descriptive
    /// fields otherwise. Never regresses a terminal status back to pending.
    pub fn upsert_polled(&mut self, polled: &[PolledIssue]) -> anyhow::Result<()> {
        let namespace = self.namespace.clone();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_rfc3339();

        for item in polled {
            let labels_json = serde_json::to_string(&item.labels)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT status FROM issues WHERE namespace = ?1 AND id = ?2",
                    params![namespace, item.id as i64],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO issues (namespace, id, title, body, url, labels_json, status, attempt_count, updated_at, created_at)
                         VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'pending', 0, ?6, ?7)",
                        params![namespace, item.id as i64, item.title, item.url, labels_json, item.updated_at, now],
                    )?;
                }
                Some(_status) => {
                    // `body` is never provided by the poller normalisation
                    // (§3 — polled issues always carry `body=null`), so the
                    // existing non-null body (if any) is always preserved.
                    tx.execute(
                        "UPDATE issues SET title = ?3, url = ?4, labels_json = ?5, updated_at = ?6
                         WHERE namespace = ?1 AND id = ?2",
                        params![namespace, item.id as i64, item.title, item.url, labels_json, item.updated_at],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Overwrite descriptive fields only; never touches status, attempt
    /// count, lease fields, or publication fields.
    pub fn update_issue_details(&mut self, details: &IssueDetails) -> anyhow::Result<()> {
        let namespace = self.namespace.clone();
        let labels_json = serde_json::to_string(&details.labels)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE issues SET title = ?3, body = ?4, url = ?5, labels_json = ?6
             WHERE namespace = ?1 AND id = ?2",
            params![namespace, details.id as i64, details.title, details.body, details.url, labels_json],
        )?;
        tx.commit()?;
        let _ = details.state; // state drives Runner skip filters, not storage
        Ok(())
    }

    /// Reset every `running` row whose lease has expired back to `pending`.
    /// Returns the number of rows affected.
    pub fn requeue_expired_leases(&mut self) -> anyhow::Result<u64> {
        let namespace = self.namespace.clone();
        let now = now_rfc3339();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let affected = tx.execute(
            "UPDATE issues SET status = 'pending', lease_until = NULL, claimed_by = NULL,
                last_error = COALESCE(last_error, 'lease expired')
             WHERE namespace = ?1 AND status = 'running' AND lease_until < ?2",
            params![namespace, now],
        )?;
        tx.commit()?;
        Ok(affected as u64)
    }

    fn claim_row(&mut self, worker: &str, max_attempts: u32, lease_seconds: i64, restrict_id: Option<u64>) -> anyhow::Result<Option<Issue>> {
        let namespace = self.namespace.clone();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let now_str = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let lease_until = (now + chrono::Duration::seconds(lease_seconds)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let candidate_id: Option<i64> = if let Some(id) = restrict_id {
            tx.query_row(
                "SELECT id FROM issues WHERE namespace = ?1 AND id = ?2 AND status = 'pending' AND attempt_count < ?3",
                params![namespace, id as i64, max_attempts],
                |row| row.get(0),
            )
            .optional()?
        } else {
            tx.query_row(
                "SELECT id FROM issues WHERE namespace = ?1 AND status = 'pending' AND attempt_count < ?2
                 ORDER BY COALESCE(updated_at, created_at) DESC, id ASC LIMIT 1",
                params![namespace, max_attempts],
                |row| row.get(0),
            )
            .optional()?
        };

        let Some(candidate_id) = candidate_id else {
            tx.commit()?;
            return Ok(None);
        };

        // Conditional on `status = 'pending'`: under the IMMEDIATE write
        // lock this process already holds, the row cannot have changed
        // since the SELECT above, but the predicate is kept explicit per
        // the compare-and-swap design note rather than relying on that.
        let affected = tx.execute(
            "UPDATE issues SET status = 'running', lease_until = ?4, claimed_by = ?5, started_at = ?6, attempt_count = attempt_count + 1
             WHERE namespace = ?1 AND id = ?2 AND status = 'pending'",
            params![namespace, candidate_id, max_attempts, lease_until, worker, now_str],
        )?;

        if affected == 0 {
            tx.commit()?;
            return Ok(None);
        }

        let issue = tx.query_row(
            "SELECT * FROM issues WHERE namespace = ?1 AND id = ?2",
            params![namespace, candidate_id],
            Self::row_to_issue,
        )?;
        tx.commit()?;
        Ok(Some(issue))
    }

    pub fn claim_next_pending(&mut self, worker: &str, max_attempts: u32, lease_seconds: i64) -> anyhow::Result<Option<Issue>> {
        self.claim_row(worker, max_attempts, lease_seconds, None)
    }

    pub fn claim_pending_by_id(&mut self, id: u64, worker: &str, max_attempts: u32, lease_seconds: i64) -> anyhow::Result<Option<Issue>> {
        self.claim_row(worker, max_attempts, lease_seconds, Some(id))
    }

    fn mark_terminal(
        &mut self,
        id: u64,
        status: IssueStatus,
        last_error: Option<&str>,
        publication: Option<(&str, Option<u64>, Option<&str>, Option<&str>)>,
    ) -> anyhow::Result<()> {
        let namespace = self.namespace.clone();
        let now = now_rfc3339();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some((branch, pr_number, pr_url, head_sha)) = publication {
            tx.execute(
                "UPDATE issues SET status = ?3, lease_until = NULL, claimed_by = NULL, completed_at = ?4,
                    last_error = ?5, branch = ?6, pr_number = ?7, pr_url = ?8, head_sha = ?9
                 WHERE namespace = ?1 AND id = ?2",
                params![
                    namespace,
                    id as i64,
                    status.as_str(),
                    now,
                    last_error,
                    branch,
                    pr_number.map(|n| n as i64),
                    pr_url,
                    head_sha
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE issues SET status = ?3, lease_until = NULL, claimed_by = NULL, completed_at = ?4, last_error = ?5
                 WHERE namespace = ?1 AND id = ?2",
                params![namespace, id as i64, status.as_str(), now, last_error],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn mark_done(&mut self, id: u64, branch: &str, pr_number: Option<u64>, pr_url: Option<&str>, head_sha: Option<&str>) -> anyhow::Result<()> {
        self.mark_terminal(id, IssueStatus::Done, None, Some((branch, pr_number, pr_url, head_sha)))
    }

    pub fn mark_failed(&mut self, id: u64, error: &str) -> anyhow::Result<()> {
        self.mark_terminal(id, IssueStatus::Failed, Some(error), None)
    }

    pub fn mark_timeout(&mut self, id: u64, error: &str) -> anyhow::Result<()> {
        self.mark_terminal(id, IssueStatus::Timeout, Some(error), None)
    }

    pub fn mark_skipped(&mut self, id: u64, reason: &str) -> anyhow::Result<()> {
        self.mark_terminal(id, IssueStatus::Skipped, Some(reason), None)
    }

    pub fn get_status_counts(&self) -> anyhow::Result<HashMap<IssueStatus, u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM issues WHERE namespace = ?1 GROUP BY status")?;
        let rows = stmt.query_map(params![self.namespace], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count as u32))
        })?;

        let mut counts = HashMap::new();
        for status in IssueStatus::ALL {
            counts.insert(status, 0);
        }
        for row in rows {
            let (status_str, count) = row?;
            if let Some(status) = IssueStatus::parse(&status_str) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    pub fn get_meta(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO meta (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![self.namespace, key, value],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn done_count_key(date: &str) -> String {
        format!("done_count:{date}")
    }

    pub fn get_daily_done_count(&self, date: &str) -> anyhow::Result<u32> {
        let key = Self::done_count_key(date);
        Ok(self.get_meta(&key)?.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Read-modify-write inside a single write transaction; returns the
    /// incremented count.
    pub fn increment_daily_done_count(&mut self, date: &str) -> anyhow::Result<u32> {
        let key = Self::done_count_key(date);
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM meta WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        let next = current.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0) + 1;
        tx.execute(
            "INSERT INTO meta (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![self.namespace, key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    pub fn clear_namespace_state(&mut self) -> anyhow::Result<(u64, u64)> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let issues_deleted = tx.execute("DELETE FROM issues WHERE namespace = ?1", params![self.namespace])?;
        let meta_deleted = tx.execute("DELETE FROM meta WHERE namespace = ?1", params![self.namespace])?;
        tx.commit()?;
        Ok((issues_deleted as u64, meta_deleted as u64))
    }

    /// Look up one row by id, for tests and CLI `status` rendering.
    pub fn get(&self, id: u64) -> anyhow::Result<Option<Issue>> {
        let issue = self
            .conn
            .query_row(
                "SELECT * FROM issues WHERE namespace = ?1 AND id = ?2",
                params![self.namespace, id as i64],
                Self::row_to_issue,
            )
            .optional()?;
        Ok(issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polled(id: u64, title: &str) -> PolledIssue {
        PolledIssue { id, title: title.to_string(), url: None, labels: vec!["enhancement".to_string()], updated_at: Some(now_rfc3339()) }
    }

    #[test]
    fn upsert_then_claim_transitions_to_running() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "first")]).unwrap();
        let claimed = store.claim_next_pending("worker-1", 2, 60).unwrap().unwrap();
        assert_eq!(claimed.status, IssueStatus::Running);
        assert_eq!(claimed.attempt_count, 1);
        assert!(claimed.lease_until.is_some());
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-1"));
    }

    #[test]
    fn upsert_polled_is_idempotent_and_keeps_nonnull_body() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "first")]).unwrap();
        store
            .update_issue_details(&IssueDetails {
                id: 1,
                title: "first".into(),
                body: Some("has a body".into()),
                url: None,
                labels: vec!["enhancement".into()],
                state: IssueState::Open,
            })
            .unwrap();
        store.upsert_polled(&[polled(1, "first (renamed)")]).unwrap();

        let row = store.get(1).unwrap().unwrap();
        assert_eq!(row.title, "first (renamed)");
        assert_eq!(row.body.as_deref(), Some("has a body"));
    }

    #[test]
    fn upsert_polled_never_regresses_terminal_status() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "first")]).unwrap();
        store.claim_next_pending("worker-1", 2, 60).unwrap();
        store.mark_done(1, "codex/issue-1", Some(42), Some("https://x/pull/42"), Some("abc123")).unwrap();

        store.upsert_polled(&[polled(1, "first (still labelled)")]).unwrap();

        let row = store.get(1).unwrap().unwrap();
        assert_eq!(row.status, IssueStatus::Done);
    }

    #[test]
    fn claim_skips_rows_at_max_attempts() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "first")]).unwrap();
        store.claim_next_pending("worker-1", 1, 60).unwrap();
        store.mark_failed(1, "boom").unwrap();

        // attempt_count is now 1 == max_attempts; must never be claimed again.
        let claimed = store.claim_next_pending("worker-1", 1, 60).unwrap();
        assert!(claimed.is_none());
    }

    #[test]
    fn claim_returns_none_when_queue_empty() {
        let mut store = Store::open_in_memory("ns").unwrap();
        assert!(store.claim_next_pending("worker-1", 2, 60).unwrap().is_none());
    }

    #[test]
    fn requeue_expired_leases_resets_stale_running_rows() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(9, "lease test")]).unwrap();
        store.claim_next_pending("worker-a", 2, 60).unwrap();

        // Force the lease into the past directly, simulating elapsed time.
        store
            .conn
            .execute(
                "UPDATE issues SET lease_until = ?1 WHERE namespace = 'ns' AND id = 9",
                params![(Utc::now() - chrono::Duration::seconds(1)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)],
            )
            .unwrap();

        let affected = store.requeue_expired_leases().unwrap();
        assert_eq!(affected, 1);

        let row = store.get(9).unwrap().unwrap();
        assert_eq!(row.status, IssueStatus::Pending);
        assert!(row.lease_is_clear());
        assert_eq!(row.last_error.as_deref(), Some("lease expired"));
    }

    #[test]
    fn terminal_rows_always_have_clear_lease_fields() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "a"), polled(2, "b")]).unwrap();
        store.claim_next_pending("w", 2, 60).unwrap();
        store.claim_next_pending("w", 2, 60).unwrap();
        store.mark_skipped(1, "missing trigger label").unwrap();
        store.mark_failed(2, "boom").unwrap();

        for id in [1, 2] {
            let row = store.get(id).unwrap().unwrap();
            assert!(row.status.is_terminal());
            assert!(row.lease_is_clear());
        }
    }

    #[test]
    fn daily_done_count_increments_read_modify_write() {
        let mut store = Store::open_in_memory("ns").unwrap();
        assert_eq!(store.get_daily_done_count("2026-08-01").unwrap(), 0);
        assert_eq!(store.increment_daily_done_count("2026-08-01").unwrap(), 1);
        assert_eq!(store.increment_daily_done_count("2026-08-01").unwrap(), 2);
        assert_eq!(store.get_daily_done_count("2026-08-01").unwrap(), 2);
    }

    #[test]
    fn clear_namespace_state_wipes_issues_and_meta() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "a")]).unwrap();
        store.set_meta("done_count:2026-08-01", "3").unwrap();

        let (issues_deleted, meta_deleted) = store.clear_namespace_state().unwrap();
        assert_eq!(issues_deleted, 1);
        assert_eq!(meta_deleted, 1);
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn different_namespaces_share_a_file_without_colliding() {
        let conn_path = std::env::temp_dir().join(format!("issueforge-ns-test-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&conn_path);

        let mut store_a = Store::open(&conn_path, "ns-a").unwrap();
        let mut store_b = Store::open(&conn_path, "ns-b").unwrap();

        store_a.upsert_polled(&[polled(1, "in a")]).unwrap();
        store_b.upsert_polled(&[polled(1, "in b")]).unwrap();

        assert_eq!(store_a.get(1).unwrap().unwrap().title, "in a");
        assert_eq!(store_b.get(1).unwrap().unwrap().title, "in b");

        let _ = std::fs::remove_file(&conn_path);
    }

    #[test]
    fn status_counts_are_scoped_to_namespace() {
        let mut store = Store::open_in_memory("ns").unwrap();
        store.upsert_polled(&[polled(1, "a"), polled(2, "b")]).unwrap();
        store.claim_next_pending("w", 2, 60).unwrap();
        store.mark_done(1, "codex/issue-1", None, None, Some("sha")).unwrap();

        let counts = store.get_status_counts().unwrap();
        assert_eq!(counts[&IssueStatus::Done], 1);
        assert_eq!(counts[&IssueStatus::Pending], 1);
    }

    #[test]
    fn legacy_single_tenant_db_migrates_issues_and_meta_under_namespace() {
        let db_path = std::env::temp_dir().join(format!("issueforge-legacy-test-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute(
                "CREATE TABLE issues (
                    id INTEGER PRIMARY KEY,
                    title TEXT NOT NULL,
                    body TEXT,
                    url TEXT,
                    labels_json TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT,
                    lease_until TEXT,
                    claimed_by TEXT,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    branch TEXT,
                    pr_number INTEGER,
                    pr_url TEXT,
                    head_sha TEXT,
                    last_error TEXT,
                    last_run_dir TEXT
                )",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO issues (id, title, status, attempt_count, created_at) VALUES (1, 'legacy issue', 'pending', 0, '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
            conn.execute("CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)", []).unwrap();
            conn.execute("INSERT INTO meta (key, value) VALUES ('done_count:2026-08-01', '3')", []).unwrap();
        }

        let store = Store::open(&db_path, "acme-widgets").unwrap();
        let migrated = store.get(1).unwrap().unwrap();
        assert_eq!(migrated.namespace, "acme-widgets");
        assert_eq!(migrated.title, "legacy issue");
        assert_eq!(store.get_meta("done_count:2026-08-01").unwrap(), Some("3".to_string()));

        let _ = std::fs::remove_file(&db_path);
    }
}
