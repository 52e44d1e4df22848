//! In-process remote store and outbox.
//!
//! Useful for tests and for embedding the engine without a server. Both
//! types support fault injection so connectivity loss can be simulated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{Flag, MessageSender, RawMessage, RemoteError, RemoteStore};
use crate::mailbox::MailboxRole;
use crate::template::OutgoingMessage;

#[derive(Debug, Clone)]
struct StoredMessage {
    data: Vec<u8>,
    seen: bool,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    mailboxes: HashMap<MailboxRole, BTreeMap<String, StoredMessage>>,
    offline: bool,
    failing_fetches: HashSet<String>,
    failing_mutations: HashSet<String>,
    refused_mutations: HashSet<String>,
    failing_lists: bool,
    held_fetch: Option<FetchHold>,
    next_id: u64,
    connects: usize,
    open: usize,
}

impl State {
    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            Err(RemoteError::Connectivity("store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_mutation(&self, id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        if self.failing_mutations.contains(id) {
            return Err(RemoteError::Connectivity(format!("connection dropped on {id}")));
        }
        if self.refused_mutations.contains(id) {
            return Err(RemoteError::Rejected(format!("{id} is read-only")));
        }
        Ok(())
    }

    fn mailbox(&mut self, role: MailboxRole) -> &mut BTreeMap<String, StoredMessage> {
        self.mailboxes.entry(role).or_default()
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }
}

/// Pauses the next fetch until released.
///
/// Returned by [`MemoryStore::hold_next_fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchHold {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl FetchHold {
    /// Wait until a fetch is parked on this hold.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked fetch continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Connection handle for [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    role: MailboxRole,
}

/// Remote store that keeps every mailbox in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a message into a mailbox under a fixed identifier.
    pub fn insert(
        &self,
        role: MailboxRole,
        id: impl Into<String>,
        data: impl Into<Vec<u8>>,
        received_at: DateTime<Utc>,
    ) {
        self.state().mailbox(role).insert(
            id.into(),
            StoredMessage {
                data: data.into(),
                seen: false,
                received_at,
            },
        );
    }

    /// Remove a message as if another client had deleted it.
    pub fn remove(&self, role: MailboxRole, id: &str) {
        self.state().mailbox(role).remove(id);
    }

    /// Identifiers currently in a mailbox, sorted.
    #[must_use]
    pub fn ids(&self, role: MailboxRole) -> Vec<String> {
        self.state().mailbox(role).keys().cloned().collect()
    }

    /// Number of messages in a mailbox.
    #[must_use]
    pub fn len(&self, role: MailboxRole) -> usize {
        self.state().mailbox(role).len()
    }

    /// Returns true if the mailbox holds no messages.
    #[must_use]
    pub fn is_empty(&self, role: MailboxRole) -> bool {
        self.len(role) == 0
    }

    /// Whether a message carries the `Seen` flag.
    #[must_use]
    pub fn is_seen(&self, role: MailboxRole, id: &str) -> bool {
        self.state()
            .mailbox(role)
            .get(id)
            .is_some_and(|message| message.seen)
    }

    /// Raw bytes of every message in a mailbox.
    #[must_use]
    pub fn contents(&self, role: MailboxRole) -> Vec<Vec<u8>> {
        self.state()
            .mailbox(role)
            .values()
            .map(|message| message.data.clone())
            .collect()
    }

    /// Simulate total loss of connectivity (or its recovery).
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make fetches of one identifier fail with a connectivity error.
    pub fn fail_fetch(&self, id: impl Into<String>) {
        self.state().failing_fetches.insert(id.into());
    }

    /// Make every mutation of one identifier fail with a connectivity error.
    pub fn fail_mutations(&self, id: impl Into<String>) {
        self.state().failing_mutations.insert(id.into());
    }

    /// Make every mutation of one identifier be refused by the store.
    pub fn refuse_mutations(&self, id: impl Into<String>) {
        self.state().refused_mutations.insert(id.into());
    }

    /// Make listing fail with a connectivity error after connecting.
    pub fn fail_listing(&self, fail: bool) {
        self.state().failing_lists = fail;
    }

    /// Park the next fetch until the returned hold is released.
    pub fn hold_next_fetch(&self) -> FetchHold {
        let hold = FetchHold::default();
        self.state().held_fetch = Some(hold.clone());
        hold
    }

    /// Remove every injected per-message failure.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_fetches.clear();
        state.failing_mutations.clear();
        state.refused_mutations.clear();
        state.failing_lists = false;
    }

    /// Number of successful connections opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state().open
    }
}

impl RemoteStore for MemoryStore {
    type Connection = MemoryConnection;

    async fn connect(&self, role: MailboxRole) -> Result<MemoryConnection, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        state.connects += 1;
        state.open += 1;
        Ok(MemoryConnection { role })
    }

    async fn list_ids(&self, conn: &mut MemoryConnection) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        if state.failing_lists {
            return Err(RemoteError::Connectivity("listing timed out".to_string()));
        }
        Ok(state.mailbox(conn.role).keys().cloned().collect())
    }

    async fn fetch(
        &self,
        conn: &mut MemoryConnection,
        id: &str,
    ) -> Result<RawMessage, RemoteError> {
        let hold = self.state().held_fetch.take();
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.release.notified().await;
        }

        let mut state = self.state();
        state.check_online()?;
        if state.failing_fetches.contains(id) {
            return Err(RemoteError::Connectivity(format!("fetch of {id} timed out")));
        }
        let stored = state
            .mailbox(conn.role)
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;

        Ok(RawMessage {
            id: id.to_string(),
            data: stored.data,
            seen: stored.seen,
            received_at: stored.received_at,
        })
    }

    async fn append(
        &self,
        conn: &mut MemoryConnection,
        data: &[u8],
        seen: bool,
    ) -> Result<String, RemoteError> {
        let mut state = self.state();
        state.check_online()?;
        let id = state.allocate_id();
        state.mailbox(conn.role).insert(
            id.clone(),
            StoredMessage {
                data: data.to_vec(),
                seen,
                received_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn set_flag(
        &self,
        conn: &mut MemoryConnection,
        id: &str,
        flag: Flag,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.check_mutation(id)?;
        let mailbox = state.mailbox(conn.role);
        match flag {
            Flag::Seen => {
                let message = mailbox
                    .get_mut(id)
                    .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
                message.seen = true;
            }
            Flag::Deleted => {
                mailbox
                    .remove(id)
                    .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            }
        }
        Ok(())
    }

    async fn copy(
        &self,
        conn: &mut MemoryConnection,
        id: &str,
        destination: MailboxRole,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.check_mutation(id)?;
        let stored = state
            .mailbox(conn.role)
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let new_id = state.allocate_id();
        state.mailbox(destination).insert(new_id, stored);
        Ok(())
    }

    async fn close(&self, _conn: MemoryConnection) {
        let mut state = self.state();
        state.open = state.open.saturating_sub(1);
    }
}

/// Outbound transport that records every delivered message.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing_recipients: Mutex<HashSet<String>>,
}

impl MemoryOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make delivery fail for any message addressed to `address`.
    pub fn fail_recipient(&self, address: impl Into<String>) {
        self.failing_recipients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into());
    }
}

impl MessageSender for MemoryOutbox {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), RemoteError> {
        let blocked = {
            let failing = self
                .failing_recipients
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            message
                .all_recipients()
                .into_iter()
                .find(|addr| failing.contains(*addr))
                .map(str::to_string)
        };
        if let Some(addr) = blocked {
            return Err(RemoteError::Rejected(format!("recipient refused: {addr}")));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn test_offline_store_refuses_connections() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.connect(MailboxRole::Default).await.unwrap_err();
        assert!(matches!(err, RemoteError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_copy_then_delete_moves_message() {
        let store = MemoryStore::new();
        store.insert(MailboxRole::Default, "a", "Subject: x\r\n\r\nbody", now());

        let mut conn = store.connect(MailboxRole::Default).await.unwrap();
        store.copy(&mut conn, "a", MailboxRole::Spam).await.unwrap();
        store.set_flag(&mut conn, "a", Flag::Deleted).await.unwrap();
        store.close(conn).await;

        assert!(store.ids(MailboxRole::Default).is_empty());
        assert_eq!(store.ids(MailboxRole::Spam), vec!["mem-1"]);
        assert_eq!(store.connect_count(), 1);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_missing_message_is_not_found() {
        let store = MemoryStore::new();
        let mut conn = store.connect(MailboxRole::Bin).await.unwrap();
        let err = store.set_flag(&mut conn, "nope", Flag::Seen).await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound("nope".to_string()));
    }
}
