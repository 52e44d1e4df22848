//! Directory-backed mail store.
//!
//! Each mailbox is a directory under the spool root named after its role.
//! A message is `<id>.eml`; an empty `<id>.seen` file next to it marks it
//! read. If the root itself is missing the store counts as unreachable,
//! which makes unplugging a mount behave like losing the network.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use mailmirror_core::{
    Flag, MailboxRole, MessageSender, OutgoingMessage, RawMessage, RemoteError, RemoteStore,
};
use tracing::debug;

const MESSAGE_EXT: &str = "eml";
const SEEN_EXT: &str = "seen";

/// Open mailbox directory.
#[derive(Debug)]
pub struct SpoolConnection {
    dir: PathBuf,
}

/// A mail store kept as plain files.
#[derive(Debug)]
pub struct SpoolStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl SpoolStore {
    /// Create a store rooted at `root`. Nothing is touched until connect.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", Utc::now().format("%Y%m%d%H%M%S%f"))
    }

    async fn write_message(
        &self,
        dir: &Path,
        data: &[u8],
        seen: bool,
    ) -> Result<String, RemoteError> {
        let id = self.next_id();
        tokio::fs::write(message_path(dir, &id)?, data)
            .await
            .map_err(|e| io_error(e, &id))?;
        if seen {
            tokio::fs::write(seen_path(dir, &id)?, b"")
                .await
                .map_err(|e| io_error(e, &id))?;
        }
        Ok(id)
    }
}

/// Ids become file names, so anything that could escape the mailbox
/// directory cannot name a message.
fn checked(id: &str) -> Result<&str, RemoteError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(RemoteError::NotFound(id.to_string()));
    }
    Ok(id)
}

fn message_path(dir: &Path, id: &str) -> Result<PathBuf, RemoteError> {
    Ok(dir.join(format!("{}.{MESSAGE_EXT}", checked(id)?)))
}

fn seen_path(dir: &Path, id: &str) -> Result<PathBuf, RemoteError> {
    Ok(dir.join(format!("{}.{SEEN_EXT}", checked(id)?)))
}

fn io_error(err: std::io::Error, id: &str) -> RemoteError {
    if err.kind() == ErrorKind::NotFound {
        RemoteError::NotFound(id.to_string())
    } else {
        RemoteError::Connectivity(err.to_string())
    }
}

impl RemoteStore for SpoolStore {
    type Connection = SpoolConnection;

    async fn connect(&self, role: MailboxRole) -> Result<SpoolConnection, RemoteError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(RemoteError::Connectivity(format!(
                "spool {} is not available",
                self.root.display()
            )));
        }
        let dir = self.root.join(role.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RemoteError::Connectivity(e.to_string()))?;
        Ok(SpoolConnection { dir })
    }

    async fn list_ids(&self, conn: &mut SpoolConnection) -> Result<Vec<String>, RemoteError> {
        let mut entries = tokio::fs::read_dir(&conn.dir)
            .await
            .map_err(|e| RemoteError::Connectivity(e.to_string()))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RemoteError::Connectivity(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == MESSAGE_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort_unstable();
        debug!("{} message(s) in {}", ids.len(), conn.dir.display());
        Ok(ids)
    }

    async fn fetch(&self, conn: &mut SpoolConnection, id: &str) -> Result<RawMessage, RemoteError> {
        let path = message_path(&conn.dir, id)?;
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(e, id))?;
        let received_at = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        let seen = tokio::fs::try_exists(seen_path(&conn.dir, id)?)
            .await
            .unwrap_or(false);

        Ok(RawMessage {
            id: id.to_string(),
            data,
            seen,
            received_at,
        })
    }

    async fn append(
        &self,
        conn: &mut SpoolConnection,
        data: &[u8],
        seen: bool,
    ) -> Result<String, RemoteError> {
        self.write_message(&conn.dir, data, seen).await
    }

    async fn set_flag(
        &self,
        conn: &mut SpoolConnection,
        id: &str,
        flag: Flag,
    ) -> Result<(), RemoteError> {
        let path = message_path(&conn.dir, id)?;
        match flag {
            Flag::Seen => {
                tokio::fs::metadata(&path).await.map_err(|e| io_error(e, id))?;
                tokio::fs::write(seen_path(&conn.dir, id)?, b"")
                    .await
                    .map_err(|e| io_error(e, id))
            }
            Flag::Deleted => {
                tokio::fs::remove_file(&path).await.map_err(|e| io_error(e, id))?;
                let _ = tokio::fs::remove_file(seen_path(&conn.dir, id)?).await;
                Ok(())
            }
        }
    }

    async fn copy(
        &self,
        conn: &mut SpoolConnection,
        id: &str,
        destination: MailboxRole,
    ) -> Result<(), RemoteError> {
        let data = tokio::fs::read(message_path(&conn.dir, id)?)
            .await
            .map_err(|e| io_error(e, id))?;
        let seen = tokio::fs::try_exists(seen_path(&conn.dir, id)?)
            .await
            .unwrap_or(false);

        let dir = self.root.join(destination.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RemoteError::Connectivity(e.to_string()))?;
        self.write_message(&dir, &data, seen).await?;
        Ok(())
    }

    async fn close(&self, _conn: SpoolConnection) {}
}

/// Delivery into a spool means filing the message under Sent.
impl MessageSender for SpoolStore {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), RemoteError> {
        let mut conn = self.connect(MailboxRole::Sent).await?;
        let data = message.to_rfc5322(Utc::now(), true);
        let result = self.append(&mut conn, data.as_bytes(), true).await;
        self.close(conn).await;
        let id = result?;
        debug!("Filed {} under sent", id);
        Ok(())
    }
}
