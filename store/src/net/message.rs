//! Message vocabulary for the in-process wire protocol: endpoints, envelopes, and the
//! request/response pairs spoken between store clients and servers.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

/// Network address of a node: host plus port, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Shorthand for a loopback endpoint, the common case in tests.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opaque identifier attached to a request and echoed by its response, so an asynchronous
/// client can match the two. Canonical UUIDv4 text underneath.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The object-store protocol. One variant per request/response kind; handlers match on the
/// variant directly, so there is no downcasting anywhere on the delivery path.
///
/// Responses carry `ok` plus an optional error string rather than a `Result` because that is
/// exactly what crosses the (simulated) wire; the client re-types the string on arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PutObject {
        key: String,
        data: Bytes,
        overwrite: bool,
        correlation_id: CorrelationId,
    },
    PutObjectResponse {
        key: String,
        ok: bool,
        err: Option<String>,
        correlation_id: CorrelationId,
    },
    GetObject {
        key: String,
        correlation_id: CorrelationId,
    },
    GetObjectResponse {
        key: String,
        data: Option<Bytes>,
        ok: bool,
        err: Option<String>,
        correlation_id: CorrelationId,
    },
    DeleteObject {
        key: String,
        correlation_id: CorrelationId,
    },
    DeleteObjectResponse {
        key: String,
        ok: bool,
        err: Option<String>,
        correlation_id: CorrelationId,
    },
    ListObjects {
        prefix: String,
        correlation_id: CorrelationId,
    },
    ListObjectsResponse {
        prefix: String,
        keys: Vec<String>,
        ok: bool,
        err: Option<String>,
        correlation_id: CorrelationId,
    },
}

impl Message {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Message::PutObject { correlation_id, .. }
            | Message::PutObjectResponse { correlation_id, .. }
            | Message::GetObject { correlation_id, .. }
            | Message::GetObjectResponse { correlation_id, .. }
            | Message::DeleteObject { correlation_id, .. }
            | Message::DeleteObjectResponse { correlation_id, .. }
            | Message::ListObjects { correlation_id, .. }
            | Message::ListObjectsResponse { correlation_id, .. } => correlation_id,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::PutObjectResponse { .. }
                | Message::GetObjectResponse { .. }
                | Message::DeleteObjectResponse { .. }
                | Message::ListObjectsResponse { .. }
        )
    }

    /// Short name of the message kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::PutObject { .. } => "PUT_OBJECT",
            Message::PutObjectResponse { .. } => "PUT_OBJECT_RESPONSE",
            Message::GetObject { .. } => "GET_OBJECT",
            Message::GetObjectResponse { .. } => "GET_OBJECT_RESPONSE",
            Message::DeleteObject { .. } => "DELETE_OBJECT",
            Message::DeleteObjectResponse { .. } => "DELETE_OBJECT_RESPONSE",
            Message::ListObjects { .. } => "LIST_OBJECTS",
            Message::ListObjectsResponse { .. } => "LIST_OBJECTS_RESPONSE",
        }
    }
}

/// A message in flight: payload plus addressing. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Monotonically increasing id assigned by the bus that sent this envelope.
    pub message_id: u64,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub payload: Message,
}
