//! Asynchronous store client: routes requests by hash ring and matches responses to
//! waiters by correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use itertools::Itertools;
use tracing::{trace, warn};

use crate::error::{DeltaResult, Error};
use crate::net::{CorrelationId, Endpoint, Message, MessageBus, MessageEnvelope, MessageHandler};
use crate::storage::HashRing;

type PendingMap = Mutex<HashMap<CorrelationId, crossbeam_channel::Sender<Message>>>;

/// Handle to one in-flight request. Completes when the matching response arrives; on
/// deadline expiry the pending-map entry is removed so a late response is discarded
/// (with a warning) instead of leaking an entry forever.
pub struct ReplyWaiter {
    correlation_id: CorrelationId,
    rx: crossbeam_channel::Receiver<Message>,
    pending: Arc<PendingMap>,
}

impl ReplyWaiter {
    /// Block until the response arrives or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> DeltaResult<Message> {
        self.wait_deadline(Instant::now() + timeout, timeout)
    }

    /// `timeout` is only for the error message: the overall deadline the caller was
    /// operating under, which several waiters may share.
    fn wait_deadline(self, deadline: Instant, timeout: Duration) -> DeltaResult<Message> {
        match self.rx.recv_deadline(deadline) {
            Ok(message) => Ok(message),
            Err(_) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&self.correlation_id);
                }
                Err(Error::timeout(
                    format!("response to request {}", self.correlation_id),
                    timeout,
                ))
            }
        }
    }
}

/// Handle to a fanned-out listing: one sub-request per server, unioned on completion.
pub struct ListReply {
    prefix: String,
    waiters: Vec<(Endpoint, ReplyWaiter)>,
}

impl ListReply {
    /// Wait for every sub-response within one shared deadline. A server that answered
    /// `ok=false` contributes an empty list (with a warning); a server that did not answer
    /// at all fails the whole listing with a timeout.
    pub fn wait(self, timeout: Duration) -> DeltaResult<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut keys = Vec::new();
        for (server, waiter) in self.waiters {
            match waiter.wait_deadline(deadline, timeout)? {
                Message::ListObjectsResponse { ok: true, keys: server_keys, .. } => {
                    keys.extend(server_keys);
                }
                Message::ListObjectsResponse { ok: false, err, .. } => {
                    warn!(
                        %server,
                        prefix = self.prefix,
                        err = err.as_deref().unwrap_or("unknown"),
                        "list sub-request failed; treating shard as empty"
                    );
                }
                other => {
                    return Err(Error::generic(format!(
                        "unexpected response to list request: {}",
                        other.kind()
                    )));
                }
            }
        }
        Ok(keys.into_iter().unique().collect())
    }
}

/// Client-side endpoint of the store protocol.
///
/// Safe under concurrent calls: every request gets a unique correlation id, and the
/// pending map removes each entry exactly once, on completion or on waiter timeout.
pub struct StoreClient {
    endpoint: Endpoint,
    servers: Vec<Endpoint>,
    ring: HashRing,
    bus: Arc<MessageBus>,
    pending: Arc<PendingMap>,
}

impl StoreClient {
    /// Construct the client, build its ring from the known servers, and register it on the
    /// bus to receive responses.
    pub fn start(endpoint: Endpoint, servers: Vec<Endpoint>, bus: Arc<MessageBus>) -> Arc<Self> {
        let ring = HashRing::with_servers(servers.iter().cloned());
        let client = Arc::new(Self {
            endpoint,
            servers,
            ring,
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
        });
        client
            .bus
            .register_handler(client.endpoint.clone(), client.clone());
        client
    }

    /// Unregister from the bus. Outstanding waiters will time out.
    pub fn shutdown(&self) {
        self.bus.unregister_handler(&self.endpoint);
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn servers(&self) -> &[Endpoint] {
        &self.servers
    }

    fn register_waiter(&self) -> DeltaResult<(CorrelationId, ReplyWaiter)> {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let Ok(mut pending) = self.pending.lock() else {
            return Err(Error::generic("pending request map poisoned"));
        };
        pending.insert(correlation_id.clone(), tx);
        Ok((
            correlation_id.clone(),
            ReplyWaiter {
                correlation_id,
                rx,
                pending: self.pending.clone(),
            },
        ))
    }

    fn route(&self, key: &str) -> DeltaResult<Endpoint> {
        self.ring
            .server_for_key(key)
            .ok_or_else(|| Error::generic("store client has no servers to route to"))
    }

    pub fn put(&self, key: &str, data: Bytes, overwrite: bool) -> DeltaResult<ReplyWaiter> {
        let target = self.route(key)?;
        let (correlation_id, waiter) = self.register_waiter()?;
        self.bus.send(
            Message::PutObject {
                key: key.to_string(),
                data,
                overwrite,
                correlation_id,
            },
            &self.endpoint,
            &target,
        );
        Ok(waiter)
    }

    pub fn get(&self, key: &str) -> DeltaResult<ReplyWaiter> {
        let target = self.route(key)?;
        let (correlation_id, waiter) = self.register_waiter()?;
        self.bus.send(
            Message::GetObject {
                key: key.to_string(),
                correlation_id,
            },
            &self.endpoint,
            &target,
        );
        Ok(waiter)
    }

    pub fn delete(&self, key: &str) -> DeltaResult<ReplyWaiter> {
        let target = self.route(key)?;
        let (correlation_id, waiter) = self.register_waiter()?;
        self.bus.send(
            Message::DeleteObject {
                key: key.to_string(),
                correlation_id,
            },
            &self.endpoint,
            &target,
        );
        Ok(waiter)
    }

    /// A prefix does not hash to a single shard, so listing is broadcast to every known
    /// server and the results are unioned by [`ListReply::wait`].
    pub fn list_objects(&self, prefix: &str) -> DeltaResult<ListReply> {
        let mut waiters = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            let (correlation_id, waiter) = self.register_waiter()?;
            self.bus.send(
                Message::ListObjects {
                    prefix: prefix.to_string(),
                    correlation_id,
                },
                &self.endpoint,
                server,
            );
            waiters.push((server.clone(), waiter));
        }
        Ok(ListReply {
            prefix: prefix.to_string(),
            waiters,
        })
    }
}

impl MessageHandler for StoreClient {
    fn on_message(&self, envelope: &MessageEnvelope, _bus: &MessageBus) -> DeltaResult<()> {
        if !envelope.payload.is_response() {
            trace!(
                kind = envelope.payload.kind(),
                "client received a non-response message; ignoring"
            );
            return Ok(());
        }
        let correlation_id = envelope.payload.correlation_id().clone();
        let tx = {
            let Ok(mut pending) = self.pending.lock() else {
                return Err(Error::generic("pending request map poisoned"));
            };
            pending.remove(&correlation_id)
        };
        match tx {
            Some(tx) => {
                if tx.send(envelope.payload.clone()).is_err() {
                    trace!(%correlation_id, "waiter dropped before its response arrived");
                }
            }
            None => {
                warn!(
                    %correlation_id,
                    kind = envelope.payload.kind(),
                    "discarding late or unknown response"
                );
            }
        }
        Ok(())
    }
}
