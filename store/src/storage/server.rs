//! RPC server: one per store node, translating protocol requests into [`LocalStorage`]
//! operations.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::DeltaResult;
use crate::net::{Endpoint, Message, MessageBus, MessageEnvelope, MessageHandler};
use crate::storage::LocalStorage;

/// Stateless request handler over a [`LocalStorage`] shard.
///
/// Every failure is flattened into an `ok=false` response carrying the error's message;
/// nothing propagates into the bus. Responses travel back through the same network as
/// requests and are therefore subject to the same loss, latency, and partitions.
pub struct StoreServer {
    endpoint: Endpoint,
    storage: Arc<LocalStorage>,
}

impl StoreServer {
    /// Construct the server and register it on the bus.
    pub fn start(endpoint: Endpoint, storage: Arc<LocalStorage>, bus: &MessageBus) -> Arc<Self> {
        let server = Arc::new(Self { endpoint, storage });
        bus.register_handler(server.endpoint.clone(), server.clone());
        server
    }

    /// Unregister from the bus; in-flight requests addressed here are dropped on delivery.
    pub fn shutdown(&self, bus: &MessageBus) {
        bus.unregister_handler(&self.endpoint);
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.storage
    }
}

/// Split an operation outcome into the (ok, err) pair a response carries.
fn status(result: DeltaResult<()>) -> (bool, Option<String>) {
    match result {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    }
}

impl MessageHandler for StoreServer {
    fn on_message(&self, envelope: &MessageEnvelope, bus: &MessageBus) -> DeltaResult<()> {
        let response = match &envelope.payload {
            Message::PutObject {
                key,
                data,
                overwrite,
                correlation_id,
            } => {
                let (ok, err) = status(self.storage.put(key, data, *overwrite));
                Message::PutObjectResponse {
                    key: key.clone(),
                    ok,
                    err,
                    correlation_id: correlation_id.clone(),
                }
            }
            Message::GetObject {
                key,
                correlation_id,
            } => match self.storage.get(key) {
                Ok(data) => Message::GetObjectResponse {
                    key: key.clone(),
                    data: Some(data),
                    ok: true,
                    err: None,
                    correlation_id: correlation_id.clone(),
                },
                Err(err) => Message::GetObjectResponse {
                    key: key.clone(),
                    data: None,
                    ok: false,
                    err: Some(err.to_string()),
                    correlation_id: correlation_id.clone(),
                },
            },
            Message::DeleteObject {
                key,
                correlation_id,
            } => {
                let (ok, err) = status(self.storage.delete(key));
                Message::DeleteObjectResponse {
                    key: key.clone(),
                    ok,
                    err,
                    correlation_id: correlation_id.clone(),
                }
            }
            Message::ListObjects {
                prefix,
                correlation_id,
            } => match self.storage.list_objects(prefix) {
                Ok(keys) => Message::ListObjectsResponse {
                    prefix: prefix.clone(),
                    keys,
                    ok: true,
                    err: None,
                    correlation_id: correlation_id.clone(),
                },
                Err(err) => Message::ListObjectsResponse {
                    prefix: prefix.clone(),
                    keys: Vec::new(),
                    ok: false,
                    err: Some(err.to_string()),
                    correlation_id: correlation_id.clone(),
                },
            },
            other => {
                warn!(
                    endpoint = %self.endpoint,
                    kind = other.kind(),
                    "store server received a non-request message; ignoring"
                );
                return Ok(());
            }
        };
        trace!(
            endpoint = %self.endpoint,
            kind = response.kind(),
            "replying"
        );
        bus.send(response, &self.endpoint, &envelope.source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::CorrelationId;
    use std::sync::Mutex;

    struct Inbox {
        messages: Mutex<Vec<Message>>,
    }

    impl Inbox {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Message> {
            std::mem::take(&mut self.messages.lock().unwrap())
        }
    }

    impl MessageHandler for Inbox {
        fn on_message(&self, envelope: &MessageEnvelope, _bus: &MessageBus) -> DeltaResult<()> {
            self.messages.lock().unwrap().push(envelope.payload.clone());
            Ok(())
        }
    }

    fn setup() -> (tempfile::TempDir, MessageBus, Arc<Inbox>, Endpoint, Endpoint) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new();
        let server_ep = Endpoint::localhost(9000);
        let client_ep = Endpoint::localhost(7000);
        let storage = Arc::new(LocalStorage::new(dir.path()).unwrap());
        StoreServer::start(server_ep.clone(), storage, &bus);
        let inbox = Inbox::new();
        bus.register_handler(client_ep.clone(), inbox.clone());
        (dir, bus, inbox, client_ep, server_ep)
    }

    /// One request/response round trip takes two ticks.
    fn round_trip(bus: &MessageBus, inbox: &Inbox, request: Message, from: &Endpoint, to: &Endpoint) -> Message {
        bus.send(request, from, to);
        bus.tick_once();
        bus.tick_once();
        let mut responses = inbox.take();
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    #[test]
    fn put_then_get_round_trip() {
        let (_dir, bus, inbox, client, server) = setup();
        let put_id = CorrelationId::new();
        let response = round_trip(
            &bus,
            &inbox,
            Message::PutObject {
                key: "k".to_string(),
                data: bytes::Bytes::from_static(b"v"),
                overwrite: false,
                correlation_id: put_id.clone(),
            },
            &client,
            &server,
        );
        assert!(
            matches!(&response, Message::PutObjectResponse { ok: true, correlation_id, .. }
                if *correlation_id == put_id)
        );

        let response = round_trip(
            &bus,
            &inbox,
            Message::GetObject {
                key: "k".to_string(),
                correlation_id: CorrelationId::new(),
            },
            &client,
            &server,
        );
        match response {
            Message::GetObjectResponse { ok: true, data: Some(data), .. } => {
                assert_eq!(data, &b"v"[..]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn failures_become_error_responses() {
        let (_dir, bus, inbox, client, server) = setup();
        let response = round_trip(
            &bus,
            &inbox,
            Message::GetObject {
                key: "missing".to_string(),
                correlation_id: CorrelationId::new(),
            },
            &client,
            &server,
        );
        match response {
            Message::GetObjectResponse { ok: false, err: Some(err), .. } => {
                assert_eq!(err, "Failed to retrieve object: missing");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn non_request_messages_are_ignored() {
        let (_dir, bus, inbox, client, server) = setup();
        bus.send(
            Message::PutObjectResponse {
                key: "k".to_string(),
                ok: true,
                err: None,
                correlation_id: CorrelationId::new(),
            },
            &client,
            &server,
        );
        bus.tick_once();
        bus.tick_once();
        assert!(inbox.take().is_empty());
    }
}
