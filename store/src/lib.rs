//! delta-store: a minimal transactional table layer over a partitioned object store.
//!
//! Three subsystems stack on each other:
//!
//! 1. A partitioned blob store whose servers split the keyspace by consistent hashing and
//!    talk over a deterministic, tick-driven simulated network ([`net`], [`storage`]).
//! 2. An append-only, versioned transaction log with atomic version-file writes and full
//!    snapshot reconstruction ([`DeltaLog`], [`Snapshot`]).
//! 3. An optimistic transaction manager that stages actions against a baseline snapshot
//!    and commits the next version only if no conflicting version appeared in between
//!    ([`Transaction`]).
//!
//! A commit flows top to bottom: the transaction writes a version file through the log,
//! the log writes through the storage façade, the façade's client routes the request by
//! hash ring onto the bus, the simulated network delivers it to the owning server some
//! ticks later, and the response retraces the same path matched up by correlation id.
//!
//! ```no_run
//! use std::sync::Arc;
//! use delta_store::{DeltaLog, Transaction};
//! use delta_store::storage::InMemoryStorage;
//!
//! # fn main() -> delta_store::DeltaResult<()> {
//! let log = Arc::new(DeltaLog::new(Arc::new(InMemoryStorage::new()), "tables/orders"));
//! let mut txn = Transaction::try_new(log.clone())?;
//! txn.insert(bytes::Bytes::from_static(b"encoded records"))?;
//! let version = txn.commit("WRITE")?;
//! assert_eq!(version, 0);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod delta_log;
pub mod error;
pub mod net;
pub mod path;
pub mod snapshot;
pub mod storage;
pub mod transaction;

pub use delta_log::DeltaLog;
pub use error::{DeltaResult, Error};
pub use snapshot::Snapshot;
pub use transaction::{IsolationLevel, Transaction};

/// Concrete version number of a committed log entry.
pub type Version = u64;
