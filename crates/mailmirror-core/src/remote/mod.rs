//! Contract for the remote mail store.
//!
//! The engine never speaks a wire protocol itself. It drives any store that
//! can list, fetch and mutate messages per mailbox, and any transport that
//! can deliver an outgoing message.

pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::mailbox::MailboxRole;
use crate::template::OutgoingMessage;

/// Errors raised by a remote store or transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The store could not be reached. Always safe to retry.
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// The message no longer exists on the store.
    #[error("No such message: {0}")]
    NotFound(String),

    /// The store refused the operation.
    #[error("Operation rejected: {0}")]
    Rejected(String),
}

/// Message flags the engine manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message is marked for removal.
    Deleted,
}

/// A message as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Store-assigned identifier.
    pub id: String,
    /// RFC 5322 bytes.
    pub data: Vec<u8>,
    /// Whether the `Seen` flag is set.
    pub seen: bool,
    /// Internal date assigned by the store.
    pub received_at: DateTime<Utc>,
}

/// A remote message store holding one mailbox per [`MailboxRole`].
///
/// Connections are short-lived: the engine opens one per operation and
/// closes it when done.
pub trait RemoteStore: Send + Sync + 'static {
    /// An open session bound to a single mailbox.
    type Connection: Send;

    /// Open a connection to the mailbox with the given role.
    fn connect(
        &self,
        role: MailboxRole,
    ) -> impl Future<Output = Result<Self::Connection, RemoteError>> + Send;

    /// List every message identifier currently in the mailbox.
    fn list_ids(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<Vec<String>, RemoteError>> + Send;

    /// Fetch one message.
    fn fetch(
        &self,
        conn: &mut Self::Connection,
        id: &str,
    ) -> impl Future<Output = Result<RawMessage, RemoteError>> + Send;

    /// Append a message and return its new identifier.
    fn append(
        &self,
        conn: &mut Self::Connection,
        data: &[u8],
        seen: bool,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    /// Set a flag on a message. Setting [`Flag::Deleted`] removes it.
    fn set_flag(
        &self,
        conn: &mut Self::Connection,
        id: &str,
        flag: Flag,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Copy a message into another mailbox.
    fn copy(
        &self,
        conn: &mut Self::Connection,
        id: &str,
        destination: MailboxRole,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Close the connection.
    fn close(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;
}

/// Outbound transport for composed messages.
pub trait MessageSender: Send + Sync {
    /// Deliver one message to its recipients.
    fn send(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
