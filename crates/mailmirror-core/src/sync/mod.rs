//! Mailbox synchronization.
//!
//! [`SyncEngine`] reconciles one snapshot with the remote store per call;
//! [`PollLoop`] runs it periodically for an open mailbox.

mod engine;
mod poll;

pub use engine::{FetchFailure, Mailbox, MailboxDelta, RefreshOutcome, SyncEngine};
pub use poll::{PollHandle, PollLoop};
