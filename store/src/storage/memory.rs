//! In-memory [`StorageHandler`], for unit tests and local experiments.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::error::{DeltaResult, Error};
use crate::storage::StorageHandler;

/// A [`StorageHandler`] over a plain map. Same contract as the real store, none of the
/// network; log and transaction tests lean on this for determinism.
pub struct InMemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageHandler for InMemoryStorage {
    fn read_object(&self, path: &str) -> DeltaResult<Bytes> {
        let Ok(objects) = self.objects.read() else {
            return Err(Error::generic("in-memory store poisoned"));
        };
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::object_not_found(path))
    }

    fn write_object(&self, path: &str, data: Bytes) -> DeltaResult<()> {
        let Ok(mut objects) = self.objects.write() else {
            return Err(Error::generic("in-memory store poisoned"));
        };
        objects.insert(path.to_string(), data);
        Ok(())
    }

    fn delete_object(&self, path: &str) -> DeltaResult<()> {
        let Ok(mut objects) = self.objects.write() else {
            return Err(Error::generic("in-memory store poisoned"));
        };
        objects.remove(path);
        Ok(())
    }

    fn list_objects(&self, prefix: &str) -> DeltaResult<Vec<String>> {
        let Ok(objects) = self.objects.read() else {
            return Err(Error::generic("in-memory store poisoned"));
        };
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_store() {
        let storage = InMemoryStorage::new();
        storage
            .write_object("t/k1", Bytes::from_static(b"v1"))
            .unwrap();
        storage
            .write_object("t/k2", Bytes::from_static(b"v2"))
            .unwrap();

        assert_eq!(storage.read_object("t/k1").unwrap(), &b"v1"[..]);
        assert!(storage.object_exists("t/k1").unwrap());
        assert!(!storage.object_exists("t/k3").unwrap());

        let mut keys = storage.list_objects("t/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["t/k1", "t/k2"]);

        storage.delete_object("t/k1").unwrap();
        storage.delete_object("t/k1").unwrap();
        assert!(storage.read_object("t/k1").unwrap_err().is_not_found());
    }
}
