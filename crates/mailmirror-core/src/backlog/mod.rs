//! Deferred user actions.
//!
//! When a mutation cannot reach the remote store it is recorded here and
//! replayed by a background worker until it succeeds or becomes moot.

mod model;
mod queue;

pub use model::{ActionKind, MoveProgress, PendingAction};
pub use queue::{Backlog, backlog_path, read_pending};
