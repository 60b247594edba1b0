//! The storage layer: the blob-store contract consumed by the delta log, its
//! implementations, and the pieces of the partitioned store (ring, server, client, façade).

mod client;
mod local;
mod memory;
mod object;
mod ring;
mod server;

pub use client::{ListReply, ReplyWaiter, StoreClient};
pub use local::LocalStorage;
pub use memory::InMemoryStorage;
pub use object::{ObjectStorage, DEFAULT_OPERATION_TIMEOUT};
pub use ring::{HashRing, VIRTUAL_NODES_PER_SERVER};
pub use server::StoreServer;

use bytes::Bytes;

use crate::error::DeltaResult;

/// Blocking blob-store contract the delta log is written against.
///
/// Keys are slash-separated logical paths. `write_object` is create-or-overwrite and must be
/// atomic: readers see either the old blob or the new one, never a prefix. There is no
/// conditional put here, which is why commit conflict detection lives with the log's caller
/// and is process-local only.
pub trait StorageHandler: Send + Sync {
    /// Fetch an entire object. Fails with [`crate::Error::ObjectNotFound`] if absent.
    fn read_object(&self, path: &str) -> DeltaResult<Bytes>;

    /// Create or overwrite an object atomically.
    fn write_object(&self, path: &str, data: Bytes) -> DeltaResult<()>;

    /// Delete an object; deleting an absent object succeeds.
    fn delete_object(&self, path: &str) -> DeltaResult<()>;

    /// All keys whose stored path starts with `prefix` (plain string prefix, not a path
    /// boundary), in unspecified order.
    fn list_objects(&self, prefix: &str) -> DeltaResult<Vec<String>>;

    /// Existence probe: a successful read means true, a missing object means false, and
    /// anything else (timeout, transport, I/O) is re-raised.
    fn object_exists(&self, path: &str) -> DeltaResult<bool> {
        match self.read_object(path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
