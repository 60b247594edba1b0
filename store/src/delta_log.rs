//! The authoritative version register for a single table.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use itertools::Itertools;
use tracing::debug;

use crate::actions::{self, Action};
use crate::error::{DeltaResult, Error};
use crate::path::LogPath;
use crate::snapshot::Snapshot;
use crate::storage::StorageHandler;
use crate::Version;

/// Directory under the table root holding the version files.
pub const LOG_DIR_NAME: &str = "_delta_log";

/// Directory under the table root holding the data files.
pub const DATA_DIR_NAME: &str = "data";

/// Append-only, versioned transaction log over a [`StorageHandler`].
///
/// Writing the version file is the commit point; the storage write is atomic, so a version
/// either exists in full or not at all. Conflict detection is the caller's job (see
/// [`crate::Transaction`]) and coordinates through [`DeltaLog::lock`], which makes commits
/// linearizable within one process. Across processes the store is last-writer-wins (there
/// is no conditional put in the storage contract), so a table must have a single writing
/// process.
pub struct DeltaLog {
    storage: Arc<dyn StorageHandler>,
    table_path: String,
    log_path: String,
    data_path: String,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    commit_lock: Mutex<()>,
}

impl DeltaLog {
    pub fn new(storage: Arc<dyn StorageHandler>, table_path: impl Into<String>) -> Self {
        let table_path = table_path.into().trim_end_matches('/').to_string();
        let log_path = format!("{table_path}/{LOG_DIR_NAME}/");
        let data_path = format!("{table_path}/{DATA_DIR_NAME}/");
        Self {
            storage,
            table_path,
            log_path,
            data_path,
            snapshot: RwLock::new(None),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self) -> &str {
        &self.table_path
    }

    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    pub fn storage(&self) -> &Arc<dyn StorageHandler> {
        &self.storage
    }

    /// Every committed version, in no particular order. Non-version files in the log
    /// directory are skipped.
    pub fn list_versions(&self) -> DeltaResult<Vec<Version>> {
        let keys = self.storage.list_objects(&self.log_path)?;
        Ok(keys
            .iter()
            .map(|key| LogPath::version_from_name(key))
            .filter(|&version| version >= 0)
            .map(|version| version as Version)
            .collect())
    }

    /// The highest committed version, or −1 for an empty log.
    pub fn latest_version(&self) -> DeltaResult<i64> {
        Ok(self
            .list_versions()?
            .into_iter()
            .max()
            .map_or(crate::snapshot::EMPTY_VERSION, |version| version as i64))
    }

    /// Persist `actions` as `version`. This is the commit point: the write is atomic, and
    /// once it returns the version exists. The store's create-or-overwrite semantics mean
    /// a double commit of the same version silently clobbers; callers serialize through
    /// [`DeltaLog::lock`] to rule that out.
    pub fn write(&self, version: Version, actions: &[Action]) -> DeltaResult<()> {
        let path = LogPath::from_version(version).path_in(&self.log_path);
        let payload = actions::encode(actions)?;
        debug!(version, path, actions = actions.len(), "writing version file");
        self.storage.write_object(&path, payload)
    }

    /// Read back the actions of one committed version.
    pub fn read_version(&self, version: Version) -> DeltaResult<Vec<Action>> {
        let path = LogPath::from_version(version).path_in(&self.log_path);
        actions::decode(&self.storage.read_object(&path)?)
    }

    /// Rebuild the table state from scratch: replay every existing version in ascending
    /// order. Gaps in the version sequence are tolerated: whatever versions exist are
    /// replayed.
    pub fn snapshot(&self) -> DeltaResult<Snapshot> {
        let latest = self.latest_version()?;
        if latest < 0 {
            return Ok(Snapshot::empty());
        }
        let mut actions = Vec::new();
        for version in self.list_versions()?.into_iter().sorted() {
            actions.extend(self.read_version(version)?);
        }
        Ok(Snapshot::new(latest, actions))
    }

    /// Return the current snapshot, recomputing only if the log has advanced past the
    /// cached one. Idempotent: two calls with no intervening write return the identical
    /// `Arc`.
    pub fn update(&self) -> DeltaResult<Arc<Snapshot>> {
        let latest = self.latest_version()?;
        {
            let Ok(cached) = self.snapshot.read() else {
                return Err(Error::generic("snapshot cache poisoned"));
            };
            if let Some(snapshot) = cached.as_ref() {
                if snapshot.version() == latest {
                    return Ok(snapshot.clone());
                }
            }
        }
        let fresh = Arc::new(self.snapshot()?);
        let Ok(mut cached) = self.snapshot.write() else {
            return Err(Error::generic("snapshot cache poisoned"));
        };
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// The commit lock. Held for the whole conflict-check/write/refresh sequence of a
    /// commit; the guard releases on drop, on every exit path. [`DeltaLog::update`] uses
    /// the snapshot cache's own lock, so holders of this guard may refresh freely.
    pub fn lock(&self) -> DeltaResult<MutexGuard<'_, ()>> {
        self.commit_lock
            .lock()
            .map_err(|_| Error::generic("commit lock poisoned"))
    }
}
