//! Per-account runtime context.
//!
//! Everything the engine needs for one account is built here once at
//! startup and handed to callers, instead of living in global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::ActionHandler;
use crate::backlog::Backlog;
use crate::config::EngineConfig;
use crate::mailbox::{AccountId, MailboxRole};
use crate::remote::{MessageSender, RemoteStore};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::sync::{Mailbox, MailboxDelta, PollHandle, PollLoop, RefreshOutcome, SyncEngine};
use crate::template::{DispatchResult, TemplateMessage, send_grouped};
use crate::{Error, Result};

/// Snapshots, backlog and handlers of one account.
#[derive(Debug)]
pub struct AccountContext<R> {
    account: AccountId,
    config: EngineConfig,
    remote: Arc<R>,
    engine: SyncEngine<R>,
    backlog: Backlog<R>,
    mailboxes: BTreeMap<MailboxRole, Mailbox>,
    actions: ActionHandler<R>,
    cancel: CancellationToken,
}

impl<R: RemoteStore> AccountContext<R> {
    /// Load the account's snapshots and backlog.
    ///
    /// A snapshot written by an incompatible version is discarded and rebuilt
    /// by the next refresh. The backlog starts draining if it is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the backlog file is incompatible
    /// (pending actions are never discarded silently), or an I/O error.
    pub async fn open(config: EngineConfig, account: AccountId, remote: Arc<R>) -> Result<Self> {
        let store = SnapshotStore::new(&config.data_dir, account);
        let engine = SyncEngine::new(Arc::clone(&remote), store.clone());

        let mut mailboxes = BTreeMap::new();
        for role in MailboxRole::ALL {
            let mailbox = match engine.open(role).await {
                Ok(mailbox) => mailbox,
                Err(e @ Error::SchemaMismatch { .. }) => {
                    warn!("{}; rebuilding {} snapshot", e, role);
                    store.discard(role).await?;
                    Mailbox::new(role, Snapshot::new())
                }
                Err(e) => return Err(e),
            };
            mailboxes.insert(role, mailbox);
        }

        let cancel = CancellationToken::new();
        let backlog = Backlog::open(
            Arc::clone(&remote),
            &config.data_dir,
            account,
            config.backoff,
            cancel.child_token(),
        )
        .await?;

        let actions = ActionHandler::new(
            account,
            Arc::clone(&remote),
            backlog.clone(),
            store,
            mailboxes.clone(),
        );

        info!("Opened account {} in {}", account, config.data_dir.display());
        Ok(Self {
            account,
            config,
            remote,
            engine,
            backlog,
            mailboxes,
            actions,
            cancel,
        })
    }

    /// Account this context serves.
    #[must_use]
    pub const fn account(&self) -> AccountId {
        self.account
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Remote store shared by every component.
    #[must_use]
    pub const fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The mailbox with the given role.
    #[must_use]
    pub fn mailbox(&self, role: MailboxRole) -> &Mailbox {
        // every role is inserted by `open`
        &self.mailboxes[&role]
    }

    /// Sync engine shared by all mailboxes.
    #[must_use]
    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Deferred-action queue.
    #[must_use]
    pub const fn backlog(&self) -> &Backlog<R> {
        &self.backlog
    }

    /// Handler for user actions.
    #[must_use]
    pub const fn actions(&self) -> &ActionHandler<R> {
        &self.actions
    }

    /// Refresh one mailbox now.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::refresh`].
    pub async fn refresh(&self, role: MailboxRole) -> Result<RefreshOutcome> {
        self.engine.refresh(self.mailbox(role)).await
    }

    /// Start polling a mailbox. The task stops on [`AccountContext::shutdown`]
    /// or when its handle is cancelled.
    pub fn watch(&self, role: MailboxRole, deltas: mpsc::Sender<MailboxDelta>) -> PollHandle {
        PollLoop::new(self.engine.clone(), &self.config).spawn(
            self.mailbox(role).clone(),
            deltas,
            self.cancel.child_token(),
        )
    }

    /// Send a templated message from this account.
    ///
    /// # Errors
    ///
    /// See [`send_grouped`].
    pub async fn send_grouped<S: MessageSender>(
        &self,
        sender: &S,
        message: &TemplateMessage,
    ) -> Result<Vec<DispatchResult>> {
        let results = send_grouped(sender, message).await?;
        let failed = results.iter().filter(|r| !r.is_sent()).count();
        if failed > 0 {
            warn!(
                "Account {}: {} of {} dispatches failed",
                self.account,
                failed,
                results.len()
            );
        }
        Ok(results)
    }

    /// Stop every poll task and the backlog worker.
    ///
    /// Pending actions remain on disk and resume on the next
    /// [`AccountContext::open`].
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.backlog.settled().await;
        info!("Closed account {}", self.account);
    }
}
