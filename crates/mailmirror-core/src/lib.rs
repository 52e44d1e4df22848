//! # mailmirror-core
//!
//! Core synchronization engine for `MailMirror`.
//!
//! This crate provides:
//! - **Snapshots** - Persisted last-known contents of each mailbox
//! - **Sync Engine** - Incremental reconciliation against a remote store
//! - **Poll Loop** - Cancellable periodic refresh with backoff
//! - **Backlog** - Durable replay of actions deferred by connectivity loss
//! - **Actions** - Mark read, spam, restore, delete and drafts
//! - **Templates** - Placeholder rendering and grouped bulk sending
//!
//! The remote side is abstracted by [`RemoteStore`] and [`MessageSender`];
//! [`remote::memory`] provides an in-process implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod actions;
pub mod backlog;
pub mod config;
pub mod context;
mod error;
pub mod mailbox;
mod persist;
pub mod remote;
pub mod retry;
pub mod snapshot;
pub mod sync;
pub mod template;

pub use actions::{ActionHandler, ActionOutcome};
pub use backlog::{ActionKind, Backlog, MoveProgress, PendingAction};
pub use config::{BackoffConfig, EngineConfig};
pub use context::AccountContext;
pub use error::{Error, Result};
pub use mailbox::{
    AccountId, Body, EmailAddress, Header, MailboxRole, Message, MessageId, RecipientRole,
};
pub use persist::SCHEMA_VERSION;
pub use remote::{Flag, MessageSender, RawMessage, RemoteError, RemoteStore};
pub use snapshot::{Snapshot, SnapshotStore};
pub use sync::{FetchFailure, Mailbox, MailboxDelta, PollHandle, PollLoop, RefreshOutcome, SyncEngine};
pub use template::{
    BulletStyle, DispatchResult, OutgoingMessage, Tag, TagKind, TagValue, TemplateMessage,
    TemplateRecipient, send_grouped,
};
