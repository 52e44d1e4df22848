//! Account and mailbox identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a mailbox within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MailboxRole {
    /// Incoming mail.
    Default,
    /// Unsent drafts.
    Drafts,
    /// Sent mail.
    Sent,
    /// Spam/junk.
    Spam,
    /// Deleted mail awaiting permanent removal.
    Bin,
}

impl MailboxRole {
    /// Every role, in display order.
    pub const ALL: [Self; 5] = [Self::Default, Self::Drafts, Self::Sent, Self::Spam, Self::Bin];

    /// Stable lowercase name, used for file names and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Drafts => "drafts",
            Self::Sent => "sent",
            Self::Spam => "spam",
            Self::Bin => "bin",
        }
    }

    /// Detect the role from a server folder name.
    ///
    /// Returns `None` for folders that do not map onto a role.
    #[must_use]
    pub fn from_folder_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower == "inbox" || lower == "default" {
            Some(Self::Default)
        } else if lower.contains("sent") {
            Some(Self::Sent)
        } else if lower.contains("draft") {
            Some(Self::Drafts)
        } else if lower.contains("trash") || lower.contains("deleted") || lower == "bin" {
            Some(Self::Bin)
        } else if lower.contains("spam") || lower.contains("junk") {
            Some(Self::Spam)
        } else {
            None
        }
    }
}

impl fmt::Display for MailboxRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no mailbox role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mailbox role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for MailboxRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_folder_name(s).ok_or_else(|| UnknownRole(s.to_string()))
    }
}
