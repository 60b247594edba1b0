//! Optimistic transactions over a [`DeltaLog`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actions::{Action, AddFile, CommitInfo};
use crate::delta_log::DeltaLog;
use crate::error::{DeltaResult, Error};
use crate::storage::StorageHandler;
use crate::Version;

/// Commit retries before [`Transaction::commit_with_retry`] gives up.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Isolation level recorded with each commit. Currently provenance only: the conflict
/// predicate is the same version check at every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    WriteSerializable,
    SnapshotIsolation,
}

/// A single optimistic transaction: read a baseline snapshot, stage actions, and commit
/// the next version only if nothing was committed past the baseline in the meantime.
///
/// Single-shot: after a successful commit the transaction is terminal and rejects further
/// staging and commits. A failed commit leaves it open, but a conflict means the baseline
/// is stale, so making progress requires a fresh transaction; this one does not re-stage.
pub struct Transaction {
    log: Arc<DeltaLog>,
    read_version: i64,
    actions: Vec<Action>,
    isolation_level: IsolationLevel,
    max_retry_count: u32,
    committed: bool,
}

impl Transaction {
    /// Open a transaction against the log's current snapshot.
    pub fn try_new(log: Arc<DeltaLog>) -> DeltaResult<Self> {
        let snapshot = log.update()?;
        Ok(Self {
            log,
            read_version: snapshot.version(),
            actions: Vec::new(),
            isolation_level: IsolationLevel::default(),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            committed: false,
        })
    }

    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// The log version this transaction observed when it was opened.
    pub fn read_version(&self) -> i64 {
        self.read_version
    }

    /// Actions staged so far, in staging order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn ensure_open(&self) -> DeltaResult<()> {
        if self.committed {
            return Err(Error::generic(
                "transaction has already been committed; open a new one",
            ));
        }
        Ok(())
    }

    /// Stage an arbitrary action.
    pub fn stage(&mut self, action: Action) -> DeltaResult<()> {
        self.ensure_open()?;
        self.actions.push(action);
        Ok(())
    }

    /// Write already-encoded records as a new data file under the table's data directory
    /// and stage the matching add action. Returns the table-relative path of the new file.
    pub fn insert(&mut self, data: Bytes) -> DeltaResult<String> {
        self.ensure_open()?;
        let relative = format!("{}/part-{}.parquet", crate::delta_log::DATA_DIR_NAME, Uuid::new_v4());
        let full = format!("{}/{relative}", self.log.table_path());
        let size = data.len() as u64;
        self.log.storage().write_object(&full, data)?;
        self.actions
            .push(Action::Add(AddFile::new(relative.clone(), size, now_millis())));
        debug!(path = relative, size, "staged data file");
        Ok(relative)
    }

    /// Commit the staged actions as the next version.
    ///
    /// Under the log's lock: refresh the snapshot, fail with
    /// [`Error::ConcurrentModification`] if anything was committed past our baseline,
    /// append a commit-info record, write `read_version + 1`, and refresh again so the
    /// log's cache reflects the new head. The lock guard releases on every exit path.
    pub fn commit(&mut self, operation: &str) -> DeltaResult<i64> {
        self.ensure_open()?;
        let _guard = self.log.lock()?;
        let current = self.log.update()?;
        if current.version() > self.read_version {
            return Err(Error::ConcurrentModification {
                read_version: self.read_version,
                current_version: current.version(),
            });
        }
        let next = self.read_version + 1;
        let timestamp = now_millis();
        let mut parameters = IndexMap::new();
        parameters.insert(
            "isolationLevel".to_string(),
            self.isolation_level.to_string(),
        );
        parameters.insert("startVersion".to_string(), self.read_version.to_string());
        parameters.insert("commitTime".to_string(), timestamp.to_string());
        let mut actions = self.actions.clone();
        actions.push(Action::CommitInfo(CommitInfo {
            operation: operation.to_string(),
            parameters,
            timestamp,
        }));
        self.log.write(next as Version, &actions)?;
        self.log.update()?;
        self.committed = true;
        debug!(version = next, operation, "committed");
        Ok(next)
    }

    /// [`Transaction::commit`] wrapped in exponential backoff (50 ms · 2ⁿ) up to the
    /// configured retry count. Useful against transient storage failures; a version
    /// conflict will keep failing here, since the baseline is not re-read.
    pub fn commit_with_retry(&mut self, operation: &str) -> DeltaResult<i64> {
        let mut attempt = 0;
        loop {
            match self.commit(operation) {
                Ok(version) => return Ok(version),
                Err(err) if attempt < self.max_retry_count => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(attempt, %err, ?delay, "commit failed; backing off");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn log() -> Arc<DeltaLog> {
        Arc::new(DeltaLog::new(
            Arc::new(InMemoryStorage::new()),
            "tables/orders",
        ))
    }

    #[test]
    fn first_commit_is_version_zero() {
        let log = log();
        let mut txn = Transaction::try_new(log.clone()).unwrap();
        assert_eq!(txn.read_version(), -1);
        txn.insert(Bytes::from_static(b"records")).unwrap();
        assert_eq!(txn.commit("WRITE").unwrap(), 0);
        assert_eq!(log.latest_version().unwrap(), 0);

        let snapshot = log.update().unwrap();
        assert_eq!(snapshot.active_files().len(), 1);
    }

    #[test]
    fn insert_writes_the_data_file() {
        let log = log();
        let mut txn = Transaction::try_new(log.clone()).unwrap();
        let path = txn.insert(Bytes::from_static(b"0123456789")).unwrap();
        assert!(path.starts_with("data/part-"));
        assert!(path.ends_with(".parquet"));

        let full = format!("{}/{path}", log.table_path());
        assert_eq!(log.storage().read_object(&full).unwrap().len(), 10);
        match &txn.actions()[0] {
            Action::Add(add) => {
                assert_eq!(add.path, path);
                assert_eq!(add.size, 10);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn commit_records_provenance() {
        let log = log();
        let mut txn = Transaction::try_new(log.clone()).unwrap();
        txn.insert(Bytes::from_static(b"x")).unwrap();
        txn.commit("WRITE").unwrap();

        let snapshot = log.update().unwrap();
        let info = snapshot.commit_infos().next().unwrap();
        assert_eq!(info.operation, "WRITE");
        assert_eq!(info.parameters["isolationLevel"], "Serializable");
        assert_eq!(info.parameters["startVersion"], "-1");
        assert!(info.parameters.contains_key("commitTime"));
    }

    #[test]
    fn conflicting_commit_fails() {
        let log = log();
        // seed v0 so both transactions share a real baseline
        let mut seed = Transaction::try_new(log.clone()).unwrap();
        seed.insert(Bytes::from_static(b"c1")).unwrap();
        seed.insert(Bytes::from_static(b"c2")).unwrap();
        seed.commit("WRITE").unwrap();

        let mut tx1 = Transaction::try_new(log.clone()).unwrap();
        let mut tx2 = Transaction::try_new(log.clone()).unwrap();
        assert_eq!(tx1.read_version(), 0);
        assert_eq!(tx2.read_version(), 0);

        tx1.insert(Bytes::from_static(b"c3")).unwrap();
        assert_eq!(tx1.commit("WRITE").unwrap(), 1);

        tx2.insert(Bytes::from_static(b"c4")).unwrap();
        let err = tx2.commit("WRITE").unwrap_err();
        assert!(matches!(
            err,
            Error::ConcurrentModification {
                read_version: 0,
                current_version: 1,
            }
        ));
        assert_eq!(log.latest_version().unwrap(), 1);
    }

    #[test]
    fn committed_transactions_are_terminal() {
        let log = log();
        let mut txn = Transaction::try_new(log).unwrap();
        txn.insert(Bytes::from_static(b"x")).unwrap();
        txn.commit("WRITE").unwrap();

        assert!(txn.insert(Bytes::from_static(b"y")).is_err());
        assert!(txn.commit("WRITE").is_err());
    }

    #[test]
    fn retry_surfaces_a_persistent_conflict() {
        let log = log();
        let mut tx1 = Transaction::try_new(log.clone()).unwrap();
        let mut tx2 = Transaction::try_new(log.clone()).unwrap();
        tx1.insert(Bytes::from_static(b"a")).unwrap();
        tx1.commit("WRITE").unwrap();

        tx2.insert(Bytes::from_static(b"b")).unwrap();
        let mut tx2 = tx2.with_max_retry_count(1);
        let err = tx2.commit_with_retry("WRITE").unwrap_err();
        assert!(matches!(err, Error::ConcurrentModification { .. }));
    }

    #[test]
    fn sequential_commits_are_monotonic() {
        let log = log();
        for expected in 0..3 {
            let mut txn = Transaction::try_new(log.clone()).unwrap();
            txn.insert(Bytes::from_static(b"r")).unwrap();
            assert_eq!(txn.commit("WRITE").unwrap(), expected);
        }
        assert_eq!(log.latest_version().unwrap(), 2);
    }
}
