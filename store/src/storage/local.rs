//! Filesystem-backed blob store used by each store server for its shard.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::trace;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{DeltaResult, Error};
use crate::storage::StorageHandler;

const TMP_SUFFIX: &str = ".tmp";

/// Per-server blob store rooted at a base directory.
///
/// Logical keys are slash-separated and joined onto the root to form the physical path.
/// Writes go through a temporary sibling file and an atomic rename, so readers never
/// observe a torn blob; a per-key lock serializes writers to the same key while distinct
/// keys proceed in parallel. Reads take no lock at all.
pub struct LocalStorage {
    root: PathBuf,
    /// Lazily created, one per key ever written; never removed, bounded by the key set.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> DeltaResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn physical_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn key_lock(&self, key: &str) -> DeltaResult<Arc<Mutex<()>>> {
        let Ok(mut locks) = self.locks.lock() else {
            return Err(Error::generic("key lock table poisoned"));
        };
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Store a blob under `key`. With `overwrite` false, an existing object is a
    /// [`Error::ObjectAlreadyExists`] failure.
    pub fn put(&self, key: &str, data: &[u8], overwrite: bool) -> DeltaResult<()> {
        let lock = self.key_lock(key)?;
        let Ok(_guard) = lock.lock() else {
            return Err(Error::generic(format!("lock for key {key} poisoned")));
        };
        let target = self.physical_path(key);
        if !overwrite && target.exists() {
            return Err(Error::ObjectAlreadyExists(key.to_string()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename: the object appears in full or not at all
        let tmp = target.with_file_name(format!(
            "{}.{}{}",
            target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4(),
            TMP_SUFFIX
        ));
        if let Err(err) = fs::write(&tmp, data) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        trace!(key, bytes = data.len(), "stored object");
        Ok(())
    }

    pub fn get(&self, key: &str) -> DeltaResult<Bytes> {
        match fs::read(self.physical_path(key)) {
            Ok(data) => Ok(data.into()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::object_not_found(key)),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort delete; an absent key is not an error.
    pub fn delete(&self, key: &str) -> DeltaResult<()> {
        match fs::remove_file(self.physical_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Walk the root and return every regular file whose full path starts with
    /// `root/prefix`. This is a plain string prefix match, not a path-boundary match, so
    /// `"customer-"` matches `customer-0001`. Returned keys are relative to the root with
    /// `/` separators.
    pub fn list_objects(&self, prefix: &str) -> DeltaResult<Vec<String>> {
        let full = self.root.join(prefix);
        // materialize the directory portion of the prefix so scanning a fresh store (or an
        // unwritten table directory) yields empty rather than an error
        let dir_part = if prefix.is_empty() || prefix.ends_with('/') {
            full.clone()
        } else {
            full.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone())
        };
        if !dir_part.exists() {
            fs::create_dir_all(&dir_part)?;
        }
        let wanted = full.to_string_lossy().into_owned();
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|err| Error::Storage(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !path.to_string_lossy().starts_with(&wanted) {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            // in-flight temporaries are not objects
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let relative = path
                .strip_prefix(&self.root)
                .map_err(|err| Error::Storage(err.to_string()))?;
            keys.push(relative.to_string_lossy().replace('\\', "/"));
        }
        Ok(keys)
    }
}

impl StorageHandler for LocalStorage {
    fn read_object(&self, path: &str) -> DeltaResult<Bytes> {
        self.get(path)
    }

    fn write_object(&self, path: &str, data: Bytes) -> DeltaResult<()> {
        self.put(path, &data, true)
    }

    fn delete_object(&self, path: &str) -> DeltaResult<()> {
        self.delete(path)
    }

    fn list_objects(&self, prefix: &str) -> DeltaResult<Vec<String>> {
        self.list_objects(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn put_get_round_trip() {
        let (_dir, storage) = storage();
        storage.put("tables/t1/data/f1", b"hello", false).unwrap();
        assert_eq!(storage.get("tables/t1/data/f1").unwrap(), &b"hello"[..]);
    }

    #[test]
    fn get_missing_key_uses_the_marker_message() {
        let (_dir, storage) = storage();
        let err = storage.get("nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Failed to retrieve object: nope");
    }

    #[test]
    fn put_without_overwrite_fails_on_existing() {
        let (_dir, storage) = storage();
        storage.put("k", b"v1", false).unwrap();
        let err = storage.put("k", b"v2", false).unwrap_err();
        assert!(matches!(err, Error::ObjectAlreadyExists(_)));
        // the original blob survives
        assert_eq!(storage.get("k").unwrap(), &b"v1"[..]);
    }

    #[test]
    fn put_with_overwrite_replaces() {
        let (_dir, storage) = storage();
        storage.put("k", b"v1", false).unwrap();
        storage.put("k", b"v2", true).unwrap();
        assert_eq!(storage.get("k").unwrap(), &b"v2"[..]);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, storage) = storage();
        storage.put("k", b"v", false).unwrap();
        storage.delete("k").unwrap();
        storage.delete("k").unwrap();
        assert!(storage.get("k").unwrap_err().is_not_found());
    }

    #[test]
    fn list_matches_string_prefix_not_path_boundary() {
        let (_dir, storage) = storage();
        storage.put("customer-0", b"a", false).unwrap();
        storage.put("customer-1", b"b", false).unwrap();
        storage.put("order-0", b"c", false).unwrap();

        let mut keys = storage.list_objects("customer-").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["customer-0", "customer-1"]);
    }

    #[test]
    fn list_descends_into_directories() {
        let (_dir, storage) = storage();
        storage.put("t/_delta_log/a.json", b"{}", false).unwrap();
        storage.put("t/_delta_log/b.json", b"{}", false).unwrap();
        storage.put("t/data/part-1", b"x", false).unwrap();

        let mut keys = storage.list_objects("t/_delta_log/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["t/_delta_log/a.json", "t/_delta_log/b.json"]);
    }

    #[test]
    fn list_on_missing_prefix_creates_dir_and_returns_empty() {
        let (dir, storage) = storage();
        assert!(storage.list_objects("t/_delta_log/").unwrap().is_empty());
        assert!(dir.path().join("t/_delta_log").is_dir());
    }

    #[test]
    fn concurrent_writers_to_one_key_serialize() {
        let (_dir, storage) = storage();
        let storage = std::sync::Arc::new(storage);
        let mut threads = Vec::new();
        for i in 0..8u32 {
            let storage = storage.clone();
            threads.push(std::thread::spawn(move || {
                let body = vec![i as u8; 1024];
                storage.put("hot-key", &body, true).unwrap();
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        // whatever write won, the blob is exactly one writer's payload
        let data = storage.get("hot-key").unwrap();
        assert_eq!(data.len(), 1024);
        assert!(data.iter().all(|b| *b == data[0]));
    }
}
