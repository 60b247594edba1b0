//! A number of utilities useful for testing that we want to use in multiple crates

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use delta_store::actions::{Action, AddFile, RemoveFile};
use delta_store::net::{Endpoint, MessageBus};
use delta_store::storage::{LocalStorage, ObjectStorage, StoreClient, StoreServer};
use delta_store::DeltaLog;

/// Wall-clock tick interval used by started clusters; short so scenario tests finish in
/// tens of milliseconds rather than seconds.
pub const TEST_TICK_INTERVAL: Duration = Duration::from_millis(2);

/// Deadline for blocking storage calls in tests. Generous relative to the tick interval,
/// tight enough that a genuinely lost message fails the test quickly.
pub const TEST_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

const BASE_SERVER_PORT: u16 = 9000;
const CLIENT_PORT: u16 = 7000;

/// A full store stack on one bus: `n` servers with tempdir-backed shards, a client routing
/// across them, and a started background ticker. Dropping the cluster stops the bus.
pub struct TestCluster {
    bus: Arc<MessageBus>,
    servers: Vec<Arc<StoreServer>>,
    client: Arc<StoreClient>,
    // tempdirs clean themselves up when the cluster drops
    _roots: Vec<TempDir>,
}

impl TestCluster {
    /// Spin up a cluster with the background ticker running.
    pub fn start(server_count: usize) -> Self {
        let cluster = Self::build(server_count);
        cluster.bus.start_with_interval(TEST_TICK_INTERVAL);
        cluster
    }

    /// Spin up a cluster without starting the ticker; the test drives
    /// [`MessageBus::tick_once`] itself for full determinism.
    pub fn start_manual(server_count: usize) -> Self {
        Self::build(server_count)
    }

    fn build(server_count: usize) -> Self {
        let bus = Arc::new(MessageBus::new());
        let mut servers = Vec::with_capacity(server_count);
        let mut roots = Vec::with_capacity(server_count);
        let mut endpoints = Vec::with_capacity(server_count);
        for i in 0..server_count {
            let endpoint = Endpoint::localhost(BASE_SERVER_PORT + i as u16);
            let root = tempfile::tempdir().expect("create server root dir");
            let storage =
                Arc::new(LocalStorage::new(root.path()).expect("create server storage"));
            servers.push(StoreServer::start(endpoint.clone(), storage, &bus));
            endpoints.push(endpoint);
            roots.push(root);
        }
        let client = StoreClient::start(Endpoint::localhost(CLIENT_PORT), endpoints, bus.clone());
        Self {
            bus,
            servers,
            client,
            _roots: roots,
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    pub fn servers(&self) -> &[Arc<StoreServer>] {
        &self.servers
    }

    /// A blocking storage view with the test deadline.
    pub fn object_storage(&self) -> ObjectStorage {
        ObjectStorage::with_timeout(self.client.clone(), TEST_OPERATION_TIMEOUT)
    }

    /// A blocking storage view with a caller-chosen deadline, for timeout tests.
    pub fn object_storage_with_timeout(&self, timeout: Duration) -> ObjectStorage {
        ObjectStorage::with_timeout(self.client.clone(), timeout)
    }

    /// A delta log for `table_path`, backed by this cluster's object storage.
    pub fn delta_log(&self, table_path: &str) -> Arc<DeltaLog> {
        Arc::new(DeltaLog::new(Arc::new(self.object_storage()), table_path))
    }

    pub fn stop(&self) {
        self.bus.stop();
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.bus.stop();
    }
}

/// An add action with fixed metadata, for tests that only care about paths.
pub fn add_file(path: &str, size: u64) -> Action {
    Action::Add(AddFile::new(path, size, 1587968586000))
}

/// A remove action for `path`.
pub fn remove_file(path: &str) -> Action {
    Action::Remove(RemoveFile {
        path: path.to_string(),
        deletion_timestamp: 1587968587000,
    })
}

/// Record payloads for inserts; the encoding is opaque to the log, so any bytes do.
pub fn record_bytes(marker: &str) -> Bytes {
    Bytes::from(format!("records:{marker}"))
}
