//! Error types for the crate.

use std::time::Duration;

/// A [`std::result::Result`] that has the crate [`Error`] as the error variant.
pub type DeltaResult<T, E = Error> = std::result::Result<T, E>;

/// Prefix carried by [`Error::ObjectNotFound`] when rendered. Responses travel over the
/// simulated network as plain strings, so this marker is what lets the client side re-type
/// a missing-object failure. See [`Error::from_wire`].
pub(crate) const NOT_FOUND_MARKER: &str = "Failed to retrieve object: ";

pub(crate) const ALREADY_EXISTS_MARKER: &str = "Object already exists: ";

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested object does not exist in the store. The rendered message is part of the
    /// wire contract; existence probes rely on it surviving a round trip through a response.
    #[error("Failed to retrieve object: {0}")]
    ObjectNotFound(String),

    /// A non-overwriting put collided with an existing object.
    #[error("Object already exists: {0}")]
    ObjectAlreadyExists(String),

    /// A blocking storage operation exceeded its deadline. Lost and partitioned messages
    /// surface as this: the transport below is invisible to callers.
    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout {
        /// What we were waiting on, for diagnostics only.
        operation: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// Another transaction committed a version after this one captured its baseline.
    #[error(
        "concurrent modification: transaction read version {read_version} but version \
         {current_version} has since been committed"
    )]
    ConcurrentModification {
        read_version: i64,
        current_version: i64,
    },

    /// A path in the log directory does not follow the versioned-name scheme.
    #[error("invalid log file name: {0}")]
    InvalidLogFileName(String),

    /// Caller handed us something unusable (bad configuration value, bad version, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote store operation failed for a reason we can only report as text.
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("error serializing/deserializing log actions: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic catch-all error.
    #[error("generic delta-store error: {0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn invalid_argument(msg: impl ToString) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    pub fn object_not_found(key: impl ToString) -> Self {
        Self::ObjectNotFound(key.to_string())
    }

    pub fn timeout(operation: impl ToString, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            after,
        }
    }

    /// True if this error means the object was absent, as opposed to unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }

    /// Rebuild a typed error from an error string received in a response message.
    ///
    /// Servers flatten every failure into a string before replying. The well-known markers
    /// are recovered into their variants so callers can keep matching on types instead of
    /// substrings; anything else becomes [`Error::Storage`].
    pub(crate) fn from_wire(err: String) -> Self {
        if let Some(key) = err.strip_prefix(NOT_FOUND_MARKER) {
            Self::ObjectNotFound(key.to_string())
        } else if let Some(key) = err.strip_prefix(ALREADY_EXISTS_MARKER) {
            Self::ObjectAlreadyExists(key.to_string())
        } else {
            Self::Storage(err)
        }
    }
}
