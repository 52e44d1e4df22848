//! Mailbox and message domain types.

mod message;
mod model;

pub use message::{Body, EmailAddress, Header, Message, MessageId, RecipientRole};
pub use model::{AccountId, MailboxRole, UnknownRole};
