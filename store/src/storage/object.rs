//! Blocking [`StorageHandler`] façade over the asynchronous [`StoreClient`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{DeltaResult, Error};
use crate::net::Message;
use crate::storage::{StorageHandler, StoreClient};

/// Deadline applied to each blocking operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// The storage view application code holds: every call dispatches through the client and
/// blocks on the reply waiter with a deadline. This façade is the only place timeouts are
/// enforced; a message lost below simply never resolves its waiter and surfaces here as
/// [`Error::Timeout`].
pub struct ObjectStorage {
    client: Arc<StoreClient>,
    timeout: Duration,
}

impl ObjectStorage {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self::with_timeout(client, DEFAULT_OPERATION_TIMEOUT)
    }

    pub fn with_timeout(client: Arc<StoreClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    /// Like [`StorageHandler::write_object`] but refusing to replace an existing object.
    pub fn write_object_if_absent(&self, path: &str, data: Bytes) -> DeltaResult<()> {
        let response = self.client.put(path, data, false)?.wait(self.timeout)?;
        expect_put(response)
    }
}

fn expect_put(response: Message) -> DeltaResult<()> {
    match response {
        Message::PutObjectResponse { ok: true, .. } => Ok(()),
        Message::PutObjectResponse { err, .. } => Err(Error::from_wire(err.unwrap_or_default())),
        other => Err(unexpected("put", &other)),
    }
}

fn unexpected(operation: &str, response: &Message) -> Error {
    Error::generic(format!(
        "unexpected response to {operation} request: {}",
        response.kind()
    ))
}

impl StorageHandler for ObjectStorage {
    fn read_object(&self, path: &str) -> DeltaResult<Bytes> {
        match self.client.get(path)?.wait(self.timeout)? {
            Message::GetObjectResponse {
                ok: true,
                data: Some(data),
                ..
            } => Ok(data),
            Message::GetObjectResponse { ok: true, data: None, key, .. } => Err(Error::generic(
                format!("get response for {key} carried no data"),
            )),
            Message::GetObjectResponse { err, .. } => {
                Err(Error::from_wire(err.unwrap_or_default()))
            }
            other => Err(unexpected("get", &other)),
        }
    }

    fn write_object(&self, path: &str, data: Bytes) -> DeltaResult<()> {
        let response = self.client.put(path, data, true)?.wait(self.timeout)?;
        expect_put(response)
    }

    fn delete_object(&self, path: &str) -> DeltaResult<()> {
        match self.client.delete(path)?.wait(self.timeout)? {
            Message::DeleteObjectResponse { ok: true, .. } => Ok(()),
            Message::DeleteObjectResponse { err, .. } => {
                Err(Error::from_wire(err.unwrap_or_default()))
            }
            other => Err(unexpected("delete", &other)),
        }
    }

    fn list_objects(&self, prefix: &str) -> DeltaResult<Vec<String>> {
        self.client.list_objects(prefix)?.wait(self.timeout)
    }
}
