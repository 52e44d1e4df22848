//! Pending action model.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::mailbox::{AccountId, MailboxRole, Message, MessageId};
use crate::remote::{Flag, RemoteError, RemoteStore};

/// A user-initiated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    /// Set the `Seen` flag.
    MarkRead,
    /// Move from the inbox to Spam.
    MarkSpam,
    /// Move from Spam back to the inbox.
    UnmarkSpam,
    /// Move from Bin back to the inbox.
    Restore,
    /// Move to Bin, or remove permanently when already in Bin.
    Delete,
}

impl ActionKind {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarkRead => "mark-read",
            Self::MarkSpam => "mark-spam",
            Self::UnmarkSpam => "unmark-spam",
            Self::Restore => "restore",
            Self::Delete => "delete",
        }
    }
}

/// How far a two-step move has progressed.
///
/// A move copies the message into the destination and then deletes the
/// source. Once the copy has succeeded a replay only repeats the delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MoveProgress {
    /// Nothing has been applied yet.
    #[default]
    NotStarted,
    /// The destination copy exists; the source still has to be deleted.
    Copied,
}

/// A mutation that still has to be applied to the remote store.
///
/// Two actions are equal when they have the same kind and target message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    /// What to do.
    pub kind: ActionKind,
    /// Account owning the message.
    pub account: AccountId,
    /// Mailbox the message lives in.
    pub role: MailboxRole,
    /// The message as it was when the action was requested.
    pub message: Message,
    /// Progress of a move.
    #[serde(default)]
    pub progress: MoveProgress,
}

impl PendingAction {
    /// Create an action that has not been attempted yet.
    #[must_use]
    pub const fn new(
        kind: ActionKind,
        account: AccountId,
        role: MailboxRole,
        message: Message,
    ) -> Self {
        Self {
            kind,
            account,
            role,
            message,
            progress: MoveProgress::NotStarted,
        }
    }

    /// Target message id.
    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.message.id
    }

    /// Mailbox the message ends up in, for actions that move it.
    #[must_use]
    pub fn destination(&self) -> Option<MailboxRole> {
        match self.kind {
            ActionKind::MarkRead => None,
            ActionKind::MarkSpam => Some(MailboxRole::Spam),
            ActionKind::UnmarkSpam | ActionKind::Restore => Some(MailboxRole::Default),
            ActionKind::Delete if self.role == MailboxRole::Bin => None,
            ActionKind::Delete => Some(MailboxRole::Bin),
        }
    }

    /// Apply the action against the remote store.
    ///
    /// Moves record [`MoveProgress::Copied`] as soon as the copy succeeds, so
    /// a failed delete can be retried without copying twice.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged; callers decide which errors
    /// mean the action is done, moot, or worth retrying.
    pub async fn apply<R: RemoteStore>(&mut self, remote: &R) -> Result<(), RemoteError> {
        let mut conn = remote.connect(self.role).await?;
        let result = self.apply_with(remote, &mut conn).await;
        remote.close(conn).await;
        result
    }

    async fn apply_with<R: RemoteStore>(
        &mut self,
        remote: &R,
        conn: &mut R::Connection,
    ) -> Result<(), RemoteError> {
        let id = self.message.id.clone();
        let id = id.as_str();
        match (self.kind, self.destination()) {
            (ActionKind::MarkRead, _) => remote.set_flag(conn, id, Flag::Seen).await,
            (_, None) => remote.set_flag(conn, id, Flag::Deleted).await,
            (_, Some(destination)) => {
                if self.progress == MoveProgress::NotStarted {
                    remote.copy(conn, id, destination).await?;
                    self.progress = MoveProgress::Copied;
                }
                match remote.set_flag(conn, id, Flag::Deleted).await {
                    Err(RemoteError::NotFound(_)) if self.progress == MoveProgress::Copied => {
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }
}

impl PartialEq for PendingAction {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message.id == other.message.id
    }
}

impl Eq for PendingAction {}

impl Hash for PendingAction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.message.id.hash(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::remote::memory::MemoryStore;
    use crate::snapshot::model::tests::message;

    fn store_with(role: MailboxRole, id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(
            role,
            id,
            "Subject: s\r\n\r\nb\r\n",
            DateTime::from_timestamp(1, 0).unwrap(),
        );
        store
    }

    #[test]
    fn test_equality_ignores_role_and_progress() {
        let a = PendingAction::new(ActionKind::Delete, AccountId(1), MailboxRole::Default, message("m", 1));
        let mut b = PendingAction::new(ActionKind::Delete, AccountId(1), MailboxRole::Sent, message("m", 9));
        b.progress = MoveProgress::Copied;
        let c = PendingAction::new(ActionKind::MarkRead, AccountId(1), MailboxRole::Default, message("m", 1));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_destinations() {
        let action = |kind, role| PendingAction::new(kind, AccountId(1), role, message("m", 1));

        assert_eq!(action(ActionKind::MarkRead, MailboxRole::Default).destination(), None);
        assert_eq!(
            action(ActionKind::MarkSpam, MailboxRole::Default).destination(),
            Some(MailboxRole::Spam)
        );
        assert_eq!(
            action(ActionKind::Restore, MailboxRole::Bin).destination(),
            Some(MailboxRole::Default)
        );
        assert_eq!(
            action(ActionKind::Delete, MailboxRole::Drafts).destination(),
            Some(MailboxRole::Bin)
        );
        assert_eq!(action(ActionKind::Delete, MailboxRole::Bin).destination(), None);
    }

    #[tokio::test]
    async fn test_move_copies_then_deletes() {
        let store = store_with(MailboxRole::Default, "m");
        let mut action =
            PendingAction::new(ActionKind::MarkSpam, AccountId(1), MailboxRole::Default, message("m", 1));

        action.apply(&store).await.unwrap();

        assert_eq!(action.progress, MoveProgress::Copied);
        assert!(store.is_empty(MailboxRole::Default));
        assert_eq!(store.len(MailboxRole::Spam), 1);
        assert_eq!(store.connect_count(), 1);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_copied_move_only_deletes() {
        let store = store_with(MailboxRole::Spam, "m");
        let mut action =
            PendingAction::new(ActionKind::UnmarkSpam, AccountId(1), MailboxRole::Spam, message("m", 1));
        action.progress = MoveProgress::Copied;

        action.apply(&store).await.unwrap();

        assert!(store.is_empty(MailboxRole::Spam));
        assert!(store.is_empty(MailboxRole::Default));
    }

    #[tokio::test]
    async fn test_copied_move_with_source_gone_is_done() {
        let store = MemoryStore::new();
        let mut action =
            PendingAction::new(ActionKind::Restore, AccountId(1), MailboxRole::Bin, message("m", 1));
        action.progress = MoveProgress::Copied;

        action.apply(&store).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found() {
        let store = MemoryStore::new();
        let mut action =
            PendingAction::new(ActionKind::MarkRead, AccountId(1), MailboxRole::Default, message("m", 1));

        let err = action.apply(&store).await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound("m".to_string()));
        assert_eq!(store.connect_count(), 1);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_delete_in_bin_is_permanent() {
        let store = store_with(MailboxRole::Bin, "m");
        let mut action =
            PendingAction::new(ActionKind::Delete, AccountId(1), MailboxRole::Bin, message("m", 1));

        action.apply(&store).await.unwrap();

        for role in MailboxRole::ALL {
            assert!(store.is_empty(role));
        }
    }
}
