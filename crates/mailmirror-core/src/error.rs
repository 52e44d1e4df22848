//! Error types for the core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::mailbox::MessageId;
use crate::remote::RemoteError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote store could not be reached.
    #[error("Remote store unreachable: {0}")]
    ConnectivityFailure(String),

    /// The target message no longer exists remotely.
    #[error("Message not found: {0}")]
    TargetNotFound(MessageId),

    /// A persisted file was written by an incompatible version.
    #[error("Schema mismatch in {}: found {found:?}, expected {expected}", path.display())]
    SchemaMismatch {
        /// File that failed to load.
        path: PathBuf,
        /// Version recorded in the file, if any.
        found: Option<u32>,
        /// Version this build understands.
        expected: u32,
    },

    /// A recipient lacks a value for a placeholder tag.
    #[error("Recipient {address} has no value for tag <!{tag}!>")]
    EmptyTagValue {
        /// Offending recipient address.
        address: String,
        /// Offending tag name.
        tag: String,
    },

    /// The remote store refused the operation.
    #[error("Remote store rejected operation: {0}")]
    Rejected(String),

    /// Fetched message bytes could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(MessageId),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the operation may succeed when retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectivityFailure(_))
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Connectivity(reason) => Self::ConnectivityFailure(reason),
            RemoteError::NotFound(id) => Self::TargetNotFound(MessageId::new(id)),
            RemoteError::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
