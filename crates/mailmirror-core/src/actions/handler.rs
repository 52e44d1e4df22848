//! Action handler for user mutations.
//!
//! Coordinates between the remote store, the local snapshots and the
//! backlog.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backlog::{ActionKind, Backlog, PendingAction};
use crate::mailbox::{AccountId, MailboxRole, MessageId};
use crate::remote::{RemoteError, RemoteStore};
use crate::snapshot::SnapshotStore;
use crate::sync::Mailbox;
use crate::template::OutgoingMessage;
use crate::{Error, Result};

/// What became of a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The remote store applied the action.
    Applied,
    /// The message was already gone remotely; nothing left to do.
    AlreadyDone,
    /// The store was unreachable; the action waits in the backlog.
    Deferred,
}

/// Handler for mark-read, spam, restore and delete.
///
/// Actions are performed in two steps:
/// 1. Update the local snapshot so the view reflects the action at once
/// 2. Apply the action remotely, deferring it to the backlog when the store
///    is unreachable
///
/// A refused action is rolled back locally.
#[derive(Debug)]
pub struct ActionHandler<R> {
    account: AccountId,
    remote: Arc<R>,
    backlog: Backlog<R>,
    store: SnapshotStore,
    mailboxes: BTreeMap<MailboxRole, Mailbox>,
}

impl<R: RemoteStore> ActionHandler<R> {
    /// Create a new action handler over the account's mailboxes.
    #[must_use]
    pub const fn new(
        account: AccountId,
        remote: Arc<R>,
        backlog: Backlog<R>,
        store: SnapshotStore,
        mailboxes: BTreeMap<MailboxRole, Mailbox>,
    ) -> Self {
        Self {
            account,
            remote,
            backlog,
            store,
            mailboxes,
        }
    }

    /// Mark a message as read.
    ///
    /// # Errors
    ///
    /// See [`ActionHandler::perform`].
    pub async fn mark_read(&self, role: MailboxRole, id: &MessageId) -> Result<ActionOutcome> {
        self.perform(ActionKind::MarkRead, role, id).await
    }

    /// Move an inbox message to Spam.
    ///
    /// # Errors
    ///
    /// See [`ActionHandler::perform`].
    pub async fn mark_spam(&self, id: &MessageId) -> Result<ActionOutcome> {
        self.perform(ActionKind::MarkSpam, MailboxRole::Default, id).await
    }

    /// Move a Spam message back to the inbox.
    ///
    /// # Errors
    ///
    /// See [`ActionHandler::perform`].
    pub async fn unmark_spam(&self, id: &MessageId) -> Result<ActionOutcome> {
        self.perform(ActionKind::UnmarkSpam, MailboxRole::Spam, id).await
    }

    /// Move a message out of Bin back to the inbox.
    ///
    /// # Errors
    ///
    /// See [`ActionHandler::perform`].
    pub async fn restore(&self, id: &MessageId) -> Result<ActionOutcome> {
        self.perform(ActionKind::Restore, MailboxRole::Bin, id).await
    }

    /// Move a message to Bin, or remove it for good if it is already there.
    ///
    /// # Errors
    ///
    /// See [`ActionHandler::perform`].
    pub async fn delete(&self, role: MailboxRole, id: &MessageId) -> Result<ActionOutcome> {
        self.perform(ActionKind::Delete, role, id).await
    }

    /// Apply `kind` to the message `id` in the `role` mailbox.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetNotFound`] if the message is not in the local snapshot
    /// - [`Error::Rejected`] if the store refused the action (local state is
    ///   restored)
    /// - an I/O error if the snapshot or backlog cannot be written
    pub async fn perform(
        &self,
        kind: ActionKind,
        role: MailboxRole,
        id: &MessageId,
    ) -> Result<ActionOutcome> {
        let mailbox = self.mailbox(role)?;

        let message = {
            let mut snapshot = mailbox.snapshot().lock().await;
            let message = snapshot
                .get(id)
                .cloned()
                .ok_or_else(|| Error::TargetNotFound(id.clone()))?;
            if kind == ActionKind::MarkRead {
                snapshot.set_read(id, true);
            } else {
                snapshot.remove(id);
            }
            self.store.save(role, &snapshot).await?;
            message
        };

        info!("{} {} in {}", kind.as_str(), id, role);
        let mut action = PendingAction::new(kind, self.account, role, message);

        match action.apply(self.remote.as_ref()).await {
            Ok(()) => Ok(ActionOutcome::Applied),
            Err(RemoteError::NotFound(_)) => {
                debug!("{} already gone remotely", id);
                Ok(ActionOutcome::AlreadyDone)
            }
            Err(RemoteError::Connectivity(reason)) => {
                warn!("{} of {} deferred: {}", kind.as_str(), id, reason);
                self.backlog.enqueue(action).await?;
                Ok(ActionOutcome::Deferred)
            }
            Err(RemoteError::Rejected(reason)) => {
                warn!("{} of {} rejected: {}", kind.as_str(), id, reason);
                self.roll_back(mailbox, action).await?;
                Err(Error::Rejected(reason))
            }
        }
    }

    async fn roll_back(&self, mailbox: &Mailbox, action: PendingAction) -> Result<()> {
        let mut snapshot = mailbox.snapshot().lock().await;
        if action.kind == ActionKind::MarkRead {
            snapshot.set_read(action.id(), action.message.is_read);
        } else {
            snapshot.insert(action.message);
        }
        self.store.save(mailbox.role(), &snapshot).await
    }

    /// Store a composed message in Drafts and return its new id.
    ///
    /// Drafts are not deferred: the caller keeps the message until this
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectivityFailure`] if the store is unreachable.
    pub async fn save_draft(&self, message: &OutgoingMessage) -> Result<MessageId> {
        let data = message.to_rfc5322(Utc::now(), true);
        let mut conn = self.remote.connect(MailboxRole::Drafts).await?;
        let result = self.remote.append(&mut conn, data.as_bytes(), true).await;
        self.remote.close(conn).await;

        let id = MessageId::new(result?);
        info!("Saved draft {} ('{}')", id, message.subject);
        Ok(id)
    }

    fn mailbox(&self, role: MailboxRole) -> Result<&Mailbox> {
        self.mailboxes
            .get(&role)
            .ok_or_else(|| Error::Rejected(format!("mailbox {role} is not open")))
    }
}
