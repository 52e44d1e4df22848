//! Engine configuration.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;

/// Retry timing for background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay after a connectivity failure, in milliseconds.
    pub initial_ms: u64,
    /// Ceiling for the doubled delay, in milliseconds.
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 60_000,
        }
    }
}

/// Settings shared by every component of an account context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding snapshot and backlog files.
    pub data_dir: PathBuf,
    /// Interval between refreshes of an open mailbox, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retry timing for polls and backlog replay.
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            poll_interval_ms: 1_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("config.json")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"poll_interval_ms": 250, "backoff": {"max_ms": 4000}}"#)
            .await
            .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.backoff.max_ms, 4000);
        assert_eq!(config.backoff.initial_ms, 500);
        assert_eq!(config.data_dir, PathBuf::from("."));
    }
}
