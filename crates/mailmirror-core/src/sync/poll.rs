//! Periodic refresh of an open mailbox.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{Mailbox, MailboxDelta, SyncEngine};
use crate::config::EngineConfig;
use crate::remote::RemoteStore;
use crate::retry::{Backoff, sleep_or_cancel};

/// Handle to a running poll task.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl PollHandle {
    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Stop the task and wait for it to exit.
    ///
    /// A refresh already in flight is allowed to complete.
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.join_handle.await;
    }
}

/// Drives [`SyncEngine::refresh`] for one mailbox on a fixed interval.
#[derive(Debug)]
pub struct PollLoop<R> {
    engine: SyncEngine<R>,
    interval: Duration,
    backoff: Backoff,
}

impl<R: RemoteStore> PollLoop<R> {
    /// Create a poll loop using the interval and backoff of `config`.
    #[must_use]
    pub fn new(engine: SyncEngine<R>, config: &EngineConfig) -> Self {
        Self {
            engine,
            interval: config.poll_interval(),
            backoff: Backoff::from(&config.backoff),
        }
    }

    /// Spawn the loop. Every non-empty delta is sent on `deltas`.
    ///
    /// The loop refreshes immediately, then waits `interval` between
    /// cycles. While the store is unreachable the wait grows exponentially.
    /// It exits when `cancel` fires or when the receiver is dropped.
    pub fn spawn(
        self,
        mailbox: Mailbox,
        deltas: mpsc::Sender<MailboxDelta>,
        cancel: CancellationToken,
    ) -> PollHandle {
        let token = cancel.clone();
        let join_handle = tokio::spawn(self.run(mailbox, deltas, token));
        PollHandle {
            cancel,
            join_handle,
        }
    }

    async fn run(
        mut self,
        mailbox: Mailbox,
        deltas: mpsc::Sender<MailboxDelta>,
        cancel: CancellationToken,
    ) {
        let role = mailbox.role();
        info!("Polling {} every {:?}", role, self.interval);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.engine.refresh(&mailbox).await {
                Ok(outcome) => {
                    self.backoff.reset();
                    if !outcome.is_unchanged() && deltas.send(outcome.delta(role)).await.is_err() {
                        debug!("{}: delta receiver dropped", role);
                        break;
                    }
                    self.interval
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.next_delay().max(self.interval);
                    warn!("{}: refresh deferred for {:?}: {}", role, delay, e);
                    delay
                }
                Err(e) => {
                    warn!("{}: refresh failed: {}", role, e);
                    self.interval
                }
            };

            if sleep_or_cancel(&cancel, delay).await {
                break;
            }
        }

        info!("Stopped polling {}", role);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::mailbox::{AccountId, MailboxRole, MessageId};
    use crate::remote::memory::MemoryStore;
    use crate::snapshot::SnapshotStore;

    fn engine(dir: &std::path::Path) -> (Arc<MemoryStore>, SyncEngine<MemoryStore>) {
        let remote = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(Arc::clone(&remote), SnapshotStore::new(dir, AccountId(1)));
        (remote, engine)
    }

    fn insert(remote: &MemoryStore, id: &str, ts: i64) {
        remote.insert(
            MailboxRole::Default,
            id,
            format!("Subject: {id}\r\n\r\nbody\r\n"),
            DateTime::from_timestamp(ts, 0).unwrap(),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_are_delivered_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = engine(dir.path());
        insert(&remote, "1", 1);
        let mailbox = Mailbox::new(MailboxRole::Default, crate::snapshot::Snapshot::new());
        let (tx, mut rx) = mpsc::channel(8);

        let handle = PollLoop::new(engine, &EngineConfig::default()).spawn(
            mailbox.clone(),
            tx,
            CancellationToken::new(),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.role, MailboxRole::Default);
        assert_eq!(first.added.len(), 1);

        remote.remove(MailboxRole::Default, "1");
        insert(&remote, "2", 2);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.removed, vec![MessageId::new("1")]);
        assert_eq!(second.added[0].id, MessageId::new("2"));

        handle.cancel().await;
        assert!(rx.recv().await.is_none());
        assert_eq!(mailbox.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_connectivity_loss() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = engine(dir.path());
        insert(&remote, "late", 1);
        remote.set_offline(true);
        let (tx, mut rx) = mpsc::channel(8);

        let handle = PollLoop::new(engine, &EngineConfig::default())
            .spawn(
                Mailbox::new(MailboxRole::Default, crate::snapshot::Snapshot::new()),
                tx,
                CancellationToken::new(),
            );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(!handle.is_finished());

        remote.set_offline(false);
        let delta = tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delta.added.len(), 1);

        handle.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_receiver_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, engine) = engine(dir.path());
        insert(&remote, "1", 1);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let handle = PollLoop::new(engine, &EngineConfig::default())
            .spawn(
                Mailbox::new(MailboxRole::Default, crate::snapshot::Snapshot::new()),
                tx,
                CancellationToken::new(),
            );

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
