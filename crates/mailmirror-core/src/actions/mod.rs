//! User-initiated mutations on mirrored messages.

mod handler;

pub use handler::{ActionHandler, ActionOutcome};
