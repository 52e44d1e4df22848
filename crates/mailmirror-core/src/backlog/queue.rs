//! Durable, de-duplicated queue of deferred actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{MoveProgress, PendingAction};
use crate::config::BackoffConfig;
use crate::mailbox::AccountId;
use crate::persist::{read_versioned, write_versioned};
use crate::remote::{RemoteError, RemoteStore};
use crate::retry::{Backoff, sleep_or_cancel};
use crate::Result;

#[derive(Debug, Default)]
struct State {
    items: Vec<PendingAction>,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared<R> {
    remote: Arc<R>,
    path: PathBuf,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    state: Mutex<State>,
}

/// Actions that failed for lack of connectivity, replayed in the background.
///
/// The whole set is persisted to `<data_dir>/<account>/backlog.json` every
/// time it changes. A worker task drains it while it is non-empty and is
/// restarted by the next [`Backlog::enqueue`] once it has exited.
#[derive(Debug)]
pub struct Backlog<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Backlog<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Path of the backlog file for an account.
#[must_use]
pub fn backlog_path(data_dir: &Path, account: AccountId) -> PathBuf {
    data_dir.join(account.to_string()).join("backlog.json")
}

/// Read the persisted actions of an account without starting a worker.
///
/// # Errors
///
/// Returns [`crate::Error::SchemaMismatch`] if the file was written by an
/// incompatible version, or an I/O / serialization error.
pub async fn read_pending(data_dir: &Path, account: AccountId) -> Result<Vec<PendingAction>> {
    Ok(read_versioned(&backlog_path(data_dir, account))
        .await?
        .unwrap_or_default())
}

impl<R: RemoteStore> Backlog<R> {
    /// Load the persisted backlog and start draining it if it is non-empty.
    ///
    /// The worker stops when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SchemaMismatch`] if the file was written by an
    /// incompatible version, or an I/O / serialization error.
    pub async fn open(
        remote: Arc<R>,
        data_dir: &Path,
        account: AccountId,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let path = backlog_path(data_dir, account);
        let items = read_pending(data_dir, account).await?;
        if !items.is_empty() {
            info!("Loaded {} pending action(s) for account {}", items.len(), account);
        }

        let backlog = Self {
            shared: Arc::new(Shared {
                remote,
                path,
                backoff,
                cancel,
                state: Mutex::new(State {
                    items,
                    running: false,
                    worker: None,
                }),
            }),
        };

        {
            let mut state = backlog.shared.state.lock().await;
            if !state.items.is_empty() {
                backlog.start_worker(&mut state);
            }
        }

        Ok(backlog)
    }

    /// Add an action unless an equal one is already pending.
    ///
    /// Returns true if the action was new. New actions are persisted before
    /// this returns and wake the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog file cannot be written.
    pub async fn enqueue(&self, action: PendingAction) -> Result<bool> {
        let mut state = self.shared.state.lock().await;
        if state.items.contains(&action) {
            debug!("{} of {} already pending", action.kind.as_str(), action.id());
            return Ok(false);
        }

        info!("Deferring {} of {}", action.kind.as_str(), action.id());
        state.items.push(action);
        write_versioned(&self.shared.path, &state.items).await?;

        if !state.running {
            self.start_worker(&mut state);
        }
        Ok(true)
    }

    fn start_worker(&self, state: &mut State) {
        state.running = true;
        let backlog = self.clone();
        let cancel = self.shared.cancel.clone();
        state.worker = Some(tokio::spawn(async move {
            backlog.drain(&cancel).await;
        }));
    }

    /// Replay pending actions until none are left or `cancel` fires.
    ///
    /// Every pass attempts every item, so one unreachable target does not
    /// block the others. Items that succeed, no longer exist remotely, or
    /// are refused outright leave the queue. After a pass that leaves items
    /// behind the worker backs off, starting over after any progress.
    pub async fn drain(&self, cancel: &CancellationToken) {
        let mut backoff = Backoff::from(&self.shared.backoff);

        loop {
            let batch = {
                let mut state = self.shared.state.lock().await;
                if state.items.is_empty() || cancel.is_cancelled() {
                    state.running = false;
                    return;
                }
                state.items.clone()
            };
            debug!("Replaying {} pending action(s)", batch.len());

            let mut progressed = false;
            for mut action in batch {
                if cancel.is_cancelled() {
                    break;
                }
                let before = action.progress;
                match action.apply(self.shared.remote.as_ref()).await {
                    Ok(()) => {
                        info!("Replayed {} of {}", action.kind.as_str(), action.id());
                        self.remove(&action).await;
                        progressed = true;
                    }
                    Err(RemoteError::NotFound(_)) => {
                        debug!("{} of {} is moot", action.kind.as_str(), action.id());
                        self.remove(&action).await;
                        progressed = true;
                    }
                    Err(RemoteError::Rejected(reason)) => {
                        match (action.progress, action.destination()) {
                            (MoveProgress::Copied, Some(destination)) => warn!(
                                "Dropping {} of {}: {}; the copy in {} stays and {} keeps the original",
                                action.kind.as_str(),
                                action.id(),
                                reason,
                                destination,
                                action.role
                            ),
                            _ => warn!(
                                "Dropping {} of {}: {}",
                                action.kind.as_str(),
                                action.id(),
                                reason
                            ),
                        }
                        self.remove(&action).await;
                        progressed = true;
                    }
                    Err(RemoteError::Connectivity(reason)) => {
                        debug!("{} of {} deferred: {}", action.kind.as_str(), action.id(), reason);
                        if action.progress != before {
                            self.update(action).await;
                            progressed = true;
                        }
                    }
                }
            }

            if progressed {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            let remaining = self.len().await;
            if remaining > 0 {
                debug!("{} action(s) left, retrying in {:?}", remaining, delay);
                if sleep_or_cancel(cancel, delay).await {
                    self.shared.state.lock().await.running = false;
                    return;
                }
            }
        }
    }

    async fn remove(&self, action: &PendingAction) {
        let mut state = self.shared.state.lock().await;
        state.items.retain(|item| item != action);
        self.persist(&state.items).await;
    }

    async fn update(&self, action: PendingAction) {
        let mut state = self.shared.state.lock().await;
        if let Some(item) = state.items.iter_mut().find(|item| **item == action) {
            *item = action;
            self.persist(&state.items).await;
        }
    }

    async fn persist(&self, items: &[PendingAction]) {
        if let Err(e) = write_versioned(&self.shared.path, &items).await {
            warn!("Failed to persist backlog: {}", e);
        }
    }

    /// Number of pending actions.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.items.len()
    }

    /// Returns true if nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.shared.state.lock().await.items.is_empty()
    }

    /// Copy of the pending actions, oldest first.
    pub async fn pending(&self) -> Vec<PendingAction> {
        self.shared.state.lock().await.items.clone()
    }

    /// Wait for the current worker, if any, to exit.
    ///
    /// Returns once the queue is empty or the backlog was cancelled.
    pub async fn settled(&self) {
        let worker = self.shared.state.lock().await.worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Stop the worker and wait for it to exit. Pending actions stay on disk.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.settled().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;

    use super::*;
    use crate::backlog::model::ActionKind;
    use crate::mailbox::MailboxRole;
    use crate::remote::memory::MemoryStore;
    use crate::snapshot::model::tests::message;

    fn action(kind: ActionKind, role: MailboxRole, id: &str) -> PendingAction {
        PendingAction::new(kind, AccountId(1), role, message(id, 1))
    }

    fn insert(store: &MemoryStore, role: MailboxRole, id: &str) {
        store.insert(
            role,
            id,
            "Subject: s\r\n\r\nb\r\n",
            DateTime::from_timestamp(1, 0).unwrap(),
        );
    }

    async fn open(store: &Arc<MemoryStore>, dir: &Path) -> Backlog<MemoryStore> {
        Backlog::open(
            Arc::clone(store),
            dir,
            AccountId(1),
            BackoffConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let backlog = open(&store, dir.path()).await;

        assert!(backlog.enqueue(action(ActionKind::MarkSpam, MailboxRole::Default, "m")).await.unwrap());
        assert!(!backlog.enqueue(action(ActionKind::MarkSpam, MailboxRole::Default, "m")).await.unwrap());
        assert_eq!(backlog.len().await, 1);

        assert!(backlog.enqueue(action(ActionKind::MarkRead, MailboxRole::Default, "m")).await.unwrap());
        assert_eq!(backlog.len().await, 2);

        backlog.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_stuck_item_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        for id in ["a", "b", "stuck"] {
            insert(&store, MailboxRole::Default, id);
        }
        store.fail_mutations("stuck");
        let backlog = open(&store, dir.path()).await;

        backlog.enqueue(action(ActionKind::MarkRead, MailboxRole::Default, "stuck")).await.unwrap();
        backlog.enqueue(action(ActionKind::MarkRead, MailboxRole::Default, "a")).await.unwrap();
        backlog.enqueue(action(ActionKind::MarkSpam, MailboxRole::Default, "b")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(600), async {
            while backlog.len().await > 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .unwrap();

        let pending = backlog.pending().await;
        assert_eq!(pending[0].id().as_str(), "stuck");
        assert!(store.is_seen(MailboxRole::Default, "a"));
        assert_eq!(store.len(MailboxRole::Spam), 1);

        backlog.shutdown().await;
        assert_eq!(backlog.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_resumes_draining() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        insert(&store, MailboxRole::Bin, "m");
        store.set_offline(true);

        let first = open(&store, dir.path()).await;
        first.enqueue(action(ActionKind::Restore, MailboxRole::Bin, "m")).await.unwrap();
        first.shutdown().await;

        store.set_offline(false);
        let second = open(&store, dir.path()).await;
        assert_eq!(second.len().await, 1);

        second.settled().await;
        assert!(second.is_empty().await);
        assert_eq!(store.len(MailboxRole::Default), 1);
        assert!(store.is_empty(MailboxRole::Bin));

        let on_disk = read_pending(dir.path(), AccountId(1)).await.unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_target_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backlog = open(&store, dir.path()).await;

        backlog.enqueue(action(ActionKind::Delete, MailboxRole::Sent, "gone")).await.unwrap();
        backlog.settled().await;

        assert!(backlog.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_delete_after_copy_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        insert(&store, MailboxRole::Spam, "m");
        insert(&store, MailboxRole::Default, "m-copy");
        store.refuse_mutations("m");
        let backlog = open(&store, dir.path()).await;

        let mut partial = action(ActionKind::UnmarkSpam, MailboxRole::Spam, "m");
        partial.progress = MoveProgress::Copied;
        backlog.enqueue(partial).await.unwrap();
        backlog.settled().await;

        assert!(backlog.is_empty().await);
        assert!(read_pending(dir.path(), AccountId(1)).await.unwrap().is_empty());
        assert_eq!(store.ids(MailboxRole::Spam), vec!["m"]);
        assert_eq!(store.ids(MailboxRole::Default), vec!["m-copy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_move_progress_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        insert(&store, MailboxRole::Default, "m");
        let backlog = open(&store, dir.path()).await;

        let mut partial = action(ActionKind::MarkSpam, MailboxRole::Default, "m");
        partial.progress = MoveProgress::Copied;
        store.fail_mutations("m");
        backlog.enqueue(partial).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        backlog.shutdown().await;

        let on_disk = read_pending(dir.path(), AccountId(1)).await.unwrap();
        assert_eq!(on_disk[0].progress, MoveProgress::Copied);

        store.clear_failures();
        let reopened = open(&store, dir.path()).await;
        reopened.settled().await;

        assert!(store.is_empty(MailboxRole::Default));
        assert!(store.is_empty(MailboxRole::Spam));
    }
}
