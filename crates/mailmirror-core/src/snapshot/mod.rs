//! Local snapshot store.
//!
//! Persists the last-known set of messages for each mailbox so the view can
//! be populated before the first refresh, and so refreshes only fetch what
//! changed.

pub(crate) mod model;
mod repository;

pub use model::Snapshot;
pub use repository::SnapshotStore;
