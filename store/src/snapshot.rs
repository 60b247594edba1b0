//! Materialized view of a table at one version.

use crate::actions::{Action, AddFile, CommitInfo};

/// The version an empty table reports, before any commit exists.
pub const EMPTY_VERSION: i64 = -1;

/// Immutable replay of every version up to and including [`Snapshot::version`]. Published
/// once by the log and never mutated; readers share it freely behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: i64,
    actions: Vec<Action>,
}

impl Snapshot {
    /// The snapshot of a table with no committed versions.
    pub fn empty() -> Self {
        Self {
            version: EMPTY_VERSION,
            actions: Vec::new(),
        }
    }

    pub(crate) fn new(version: i64, actions: Vec<Action>) -> Self {
        Self { version, actions }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Every action replayed into this snapshot, in commit order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The files that make up the table at this version: add actions in replay order,
    /// minus any whose path a later remove action retired. A path re-added after its
    /// removal is live again.
    pub fn active_files(&self) -> Vec<&AddFile> {
        let mut live: Vec<&AddFile> = Vec::new();
        for action in &self.actions {
            match action {
                Action::Add(add) => live.push(add),
                Action::Remove(remove) => live.retain(|add| add.path != remove.path),
                Action::CommitInfo(_) => {}
            }
        }
        live
    }

    /// Commit provenance records, oldest first.
    pub fn commit_infos(&self) -> impl Iterator<Item = &CommitInfo> {
        self.actions.iter().filter_map(|action| match action {
            Action::CommitInfo(info) => Some(info),
            _ => None,
        })
    }
}
