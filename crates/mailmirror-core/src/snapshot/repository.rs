//! Snapshot storage repository.

use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, info};

use super::model::Snapshot;
use crate::mailbox::{AccountId, MailboxRole};
use crate::persist::{read_versioned, write_versioned};
use crate::Result;

/// Repository for per-mailbox snapshot files of one account.
///
/// Files live at `<data_dir>/<account>/snapshots/<role>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a repository rooted in `data_dir`.
    ///
    /// Nothing is created on disk until the first save.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, account: AccountId) -> Self {
        Self {
            root: data_dir.into().join(account.to_string()).join("snapshots"),
        }
    }

    /// Path of the snapshot file for a mailbox.
    #[must_use]
    pub fn path(&self, role: MailboxRole) -> PathBuf {
        self.root.join(format!("{}.json", role.as_str()))
    }

    /// Load the snapshot of a mailbox.
    ///
    /// A missing file yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SchemaMismatch`] if the file was written by an
    /// incompatible version, or an I/O / serialization error otherwise.
    pub async fn load(&self, role: MailboxRole) -> Result<Snapshot> {
        let snapshot: Snapshot = read_versioned(&self.path(role)).await?.unwrap_or_default();
        debug!("Loaded {} snapshot with {} messages", role, snapshot.len());
        Ok(snapshot)
    }

    /// Replace the stored snapshot of a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, role: MailboxRole, snapshot: &Snapshot) -> Result<()> {
        write_versioned(&self.path(role), snapshot).await
    }

    /// Delete the stored snapshot so the next refresh rebuilds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn discard(&self, role: MailboxRole) -> Result<()> {
        match tokio::fs::remove_file(self.path(role)).await {
            Ok(()) => {
                info!("Discarded {} snapshot", role);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
