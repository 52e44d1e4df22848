//! Snapshot reconciliation against the remote store.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mailbox::{MailboxRole, Message, MessageId};
use crate::remote::{RemoteError, RemoteStore};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::{Error, Result};

/// A mailbox view: its role and the shared, lockable snapshot.
///
/// Clones share the same snapshot.
#[derive(Debug, Clone)]
pub struct Mailbox {
    role: MailboxRole,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl Mailbox {
    /// Wrap a loaded snapshot.
    #[must_use]
    pub fn new(role: MailboxRole, snapshot: Snapshot) -> Self {
        Self {
            role,
            snapshot: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Role of this mailbox.
    #[must_use]
    pub const fn role(&self) -> MailboxRole {
        self.role
    }

    /// The shared snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &Arc<Mutex<Snapshot>> {
        &self.snapshot
    }

    /// Copy of every message, newest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.snapshot.lock().await.iter().cloned().collect()
    }

    /// Number of messages in the snapshot.
    pub async fn len(&self) -> usize {
        self.snapshot.lock().await.len()
    }

    /// Returns true if the snapshot is empty.
    pub async fn is_empty(&self) -> bool {
        self.snapshot.lock().await.is_empty()
    }
}

/// A message that was listed remotely but could not be mirrored this cycle.
#[derive(Debug)]
pub struct FetchFailure {
    /// The message that failed.
    pub id: MessageId,
    /// Why it failed.
    pub error: Error,
}

/// Result of one refresh cycle.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Newly mirrored messages, newest first.
    pub added: Vec<Message>,
    /// Messages that disappeared remotely.
    pub removed: Vec<MessageId>,
    /// Listed messages that could not be fetched. They are retried next cycle.
    pub failed: Vec<FetchFailure>,
}

impl RefreshOutcome {
    /// Returns true if the snapshot did not change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// The part of the outcome a live view applies.
    #[must_use]
    pub fn delta(&self, role: MailboxRole) -> MailboxDelta {
        MailboxDelta {
            role,
            added: self.added.clone(),
            removed: self.removed.clone(),
        }
    }
}

/// Changes to apply to a live mailbox view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxDelta {
    /// Mailbox the delta belongs to.
    pub role: MailboxRole,
    /// Messages to show.
    pub added: Vec<Message>,
    /// Messages to hide.
    pub removed: Vec<MessageId>,
}

/// Mirrors remote mailboxes into persisted snapshots.
#[derive(Debug)]
pub struct SyncEngine<R> {
    remote: Arc<R>,
    store: SnapshotStore,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            store: self.store.clone(),
        }
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create an engine over a remote store and a snapshot repository.
    #[must_use]
    pub const fn new(remote: Arc<R>, store: SnapshotStore) -> Self {
        Self { remote, store }
    }

    /// Snapshot repository backing this engine.
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Load the persisted snapshot of `role` into a [`Mailbox`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the stored snapshot is from an
    /// incompatible version, or an I/O error.
    pub async fn open(&self, role: MailboxRole) -> Result<Mailbox> {
        let snapshot = self.store.load(role).await?;
        Ok(Mailbox::new(role, snapshot))
    }

    /// Bring the mailbox snapshot in line with the remote store.
    ///
    /// A failure to connect or list aborts the cycle without touching the
    /// snapshot. Individual fetch failures are reported in
    /// [`RefreshOutcome::failed`]; the rest of the delta is still applied.
    /// The snapshot is persisted only when it changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectivityFailure`] if the store is unreachable, or
    /// an I/O error if the snapshot cannot be saved.
    pub async fn refresh(&self, mailbox: &Mailbox) -> Result<RefreshOutcome> {
        let role = mailbox.role();
        let mut conn = self.remote.connect(role).await?;

        let listed = match self.remote.list_ids(&mut conn).await {
            Ok(ids) => ids,
            Err(e) => {
                self.remote.close(conn).await;
                return Err(e.into());
            }
        };

        let remote_ids: HashSet<MessageId> = listed.into_iter().map(MessageId::new).collect();
        let (added_ids, removed_ids) = {
            let snapshot = mailbox.snapshot().lock().await;
            let added: Vec<MessageId> = remote_ids
                .iter()
                .filter(|id| !snapshot.contains(id))
                .cloned()
                .collect();
            let removed: Vec<MessageId> = snapshot
                .ids()
                .filter(|id| !remote_ids.contains(*id))
                .cloned()
                .collect();
            (added, removed)
        };

        debug!(
            "{}: {} listed, {} new, {} gone",
            role,
            remote_ids.len(),
            added_ids.len(),
            removed_ids.len()
        );

        let mut fetched = Vec::with_capacity(added_ids.len());
        let mut failed = Vec::new();
        for id in added_ids {
            match self.remote.fetch(&mut conn, id.as_str()).await {
                Ok(raw) => match Message::from_raw(&raw) {
                    Ok(message) => fetched.push(message),
                    Err(error) => failed.push(FetchFailure { id, error }),
                },
                Err(RemoteError::NotFound(_)) => {
                    debug!("{}: {} vanished before fetch", role, id);
                }
                Err(e) => failed.push(FetchFailure { id, error: e.into() }),
            }
        }
        self.remote.close(conn).await;

        for failure in &failed {
            warn!("{}: could not mirror {}: {}", role, failure.id, failure.error);
        }

        // staged on a copy; memory changes only after the save succeeds
        let mut snapshot = mailbox.snapshot().lock().await;
        let mut next = snapshot.clone();
        let removed: Vec<MessageId> = removed_ids
            .into_iter()
            .filter(|id| next.remove(id).is_some())
            .collect();
        for message in &fetched {
            next.insert(message.clone());
        }
        fetched.sort_by(|a, b| {
            b.received_at()
                .cmp(&a.received_at())
                .then_with(|| a.id.cmp(&b.id))
        });

        let outcome = RefreshOutcome {
            added: fetched,
            removed,
            failed,
        };

        if !outcome.is_unchanged() {
            self.store.save(role, &next).await?;
            *snapshot = next;
            info!(
                "{}: +{} -{} ({} total)",
                role,
                outcome.added.len(),
                outcome.removed.len(),
                snapshot.len()
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::mailbox::AccountId;
    use crate::remote::memory::MemoryStore;
    use crate::snapshot::model::tests::message;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    fn eml(subject: &str) -> String {
        format!("From: a@example.com\r\nTo: b@example.com\r\nSubject: {subject}\r\n\r\nHello\r\n")
    }

    fn setup(dir: &std::path::Path) -> (Arc<MemoryStore>, SyncEngine<MemoryStore>) {
        let remote = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(Arc::clone(&remote), SnapshotStore::new(dir, AccountId(1)));
        (remote, engine)
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_delta_against_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        for (id, ts) in [("A", 1), ("B", 2), ("C", 3)] {
            remote.insert(MailboxRole::Default, id, eml(id), at(ts));
        }
        let mailbox = Mailbox::new(
            MailboxRole::Default,
            [message("A", 1), message("D", 4)].into_iter().collect(),
        );

        let outcome = engine.refresh(&mailbox).await.unwrap();

        assert_eq!(ids(&outcome.added), vec!["C", "B"]);
        assert_eq!(outcome.removed, vec![MessageId::new("D")]);
        assert!(outcome.failed.is_empty());
        assert_eq!(ids(&mailbox.messages().await), vec!["C", "B", "A"]);

        let persisted = engine.store().load(MailboxRole::Default).await.unwrap();
        assert_eq!(persisted.len(), 3);
    }

    #[tokio::test]
    async fn test_second_refresh_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        remote.insert(MailboxRole::Sent, "1", eml("one"), at(10));
        remote.insert(MailboxRole::Sent, "2", eml("two"), at(20));
        let mailbox = engine.open(MailboxRole::Sent).await.unwrap();

        engine.refresh(&mailbox).await.unwrap();
        let path = engine.store().path(MailboxRole::Sent);
        let before = tokio::fs::read(&path).await.unwrap();

        let outcome = engine.refresh(&mailbox).await.unwrap();

        assert!(outcome.is_unchanged());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_offline_store_leaves_snapshot_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        remote.insert(MailboxRole::Default, "new", eml("new"), at(5));
        remote.set_offline(true);
        let mailbox = Mailbox::new(MailboxRole::Default, [message("old", 1)].into_iter().collect());

        let err = engine.refresh(&mailbox).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(ids(&mailbox.messages().await), vec!["old"]);
        assert!(!engine.store().path(MailboxRole::Default).exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_reported_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        remote.insert(MailboxRole::Default, "ok", eml("ok"), at(1));
        remote.insert(MailboxRole::Default, "flaky", eml("flaky"), at(2));
        remote.fail_fetch("flaky");
        let mailbox = engine.open(MailboxRole::Default).await.unwrap();

        let outcome = engine.refresh(&mailbox).await.unwrap();

        assert_eq!(ids(&outcome.added), vec!["ok"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].id, MessageId::new("flaky"));
        assert!(outcome.failed[0].error.is_transient());
        assert_eq!(mailbox.len().await, 1);

        remote.clear_failures();
        let outcome = engine.refresh(&mailbox).await.unwrap();
        assert_eq!(ids(&outcome.added), vec!["flaky"]);
        assert_eq!(ids(&mailbox.messages().await), vec!["flaky", "ok"]);
    }

    #[tokio::test]
    async fn test_parsed_message_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        remote.insert(
            MailboxRole::Drafts,
            "t",
            "Subject: Draft\r\nTo: x@example.com\r\n\r\nHi <!Name!>\r\n",
            at(7),
        );
        let mailbox = engine.open(MailboxRole::Drafts).await.unwrap();

        let outcome = engine.refresh(&mailbox).await.unwrap();

        let message = &outcome.added[0];
        assert_eq!(message.header.subject, "Draft");
        assert_eq!(message.tags, vec!["Name"]);
        assert_eq!(message.received_at(), at(7));
        assert!(!message.is_read);
    }

    #[tokio::test]
    async fn test_each_refresh_opens_and_closes_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = setup(dir.path());
        remote.insert(MailboxRole::Spam, "s", eml("s"), at(1));
        let mailbox = engine.open(MailboxRole::Spam).await.unwrap();

        engine.refresh(&mailbox).await.unwrap();
        assert_eq!(remote.connect_count(), 1);
        assert_eq!(remote.open_connections(), 0);

        remote.fail_listing(true);
        let err = engine.refresh(&mailbox).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(remote.connect_count(), 2);
        assert_eq!(remote.open_connections(), 0);
        assert_eq!(mailbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_delta_for_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        tokio::fs::write(&blocked, b"not a directory").await.unwrap();
        let (remote, engine) = setup(&blocked);
        remote.insert(MailboxRole::Default, "A", eml("A"), at(1));
        let mailbox = Mailbox::new(MailboxRole::Default, [message("old", 1)].into_iter().collect());

        let err = engine.refresh(&mailbox).await.unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(ids(&mailbox.messages().await), vec!["old"]);

        tokio::fs::remove_file(&blocked).await.unwrap();
        let outcome = engine.refresh(&mailbox).await.unwrap();

        assert_eq!(ids(&outcome.added), vec!["A"]);
        assert_eq!(outcome.removed, vec![MessageId::new("old")]);
        assert_eq!(ids(&mailbox.messages().await), vec!["A"]);
        assert_eq!(engine.store().load(MailboxRole::Default).await.unwrap().len(), 1);
    }

    proptest! {
        #[test]
        fn test_refresh_matches_remote_set(
            remote_ids in prop::collection::btree_set(0u8..24, 0..12),
            local_ids in prop::collection::btree_set(0u8..24, 0..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let dir = tempfile::tempdir().unwrap();

            let (added, removed, after) = runtime.block_on(async {
                let (remote, engine) = setup(dir.path());
                for id in &remote_ids {
                    remote.insert(MailboxRole::Default, id.to_string(), eml("p"), at(i64::from(*id)));
                }
                let mailbox = Mailbox::new(
                    MailboxRole::Default,
                    local_ids.iter().map(|id| message(&id.to_string(), i64::from(*id))).collect(),
                );

                let outcome = engine.refresh(&mailbox).await.unwrap();
                let added: BTreeSet<u8> = outcome.added.iter().map(|m| m.id.as_str().parse().unwrap()).collect();
                let removed: BTreeSet<u8> = outcome.removed.iter().map(|id| id.as_str().parse().unwrap()).collect();
                let after: BTreeSet<u8> = mailbox.messages().await.iter().map(|m| m.id.as_str().parse().unwrap()).collect();
                (added, removed, after)
            });

            let expected_added: BTreeSet<u8> = remote_ids.difference(&local_ids).copied().collect();
            let expected_removed: BTreeSet<u8> = local_ids.difference(&remote_ids).copied().collect();
            prop_assert_eq!(added, expected_added);
            prop_assert_eq!(removed, expected_removed);
            prop_assert_eq!(after, remote_ids);
        }
    }
}
