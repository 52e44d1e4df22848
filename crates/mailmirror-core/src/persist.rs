//! Versioned whole-file persistence shared by snapshots and the backlog.
//!
//! Every file is a JSON object `{ "version": N, "data": ... }`. A file with
//! any other version is reported as [`Error::SchemaMismatch`] so the caller
//! can decide to discard it and rebuild.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{Error, Result};

/// Version of the on-disk layout written by this build.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

/// Read a versioned file. Returns `None` if the file does not exist.
pub(crate) async fn read_versioned<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut value: serde_json::Value = serde_json::from_slice(&contents)?;
    let found = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());

    if found != Some(SCHEMA_VERSION) {
        return Err(Error::SchemaMismatch {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let data = value
        .get_mut("data")
        .map(serde_json::Value::take)
        .unwrap_or_default();
    Ok(Some(serde_json::from_value(data)?))
}

/// Replace a versioned file with `data`, creating parent directories.
///
/// The new contents are written to a sibling temp file and renamed over the
/// old one, so readers never observe a half-written file.
pub(crate) async fn write_versioned<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_vec_pretty(&EnvelopeRef {
        version: SCHEMA_VERSION,
        data,
    })?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<Vec<u32>> = read_versioned(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("data.json");

        write_versioned(&path, &vec![1_u32, 2, 3]).await.unwrap();
        let value: Vec<u32> = read_versioned(&path).await.unwrap().unwrap();

        assert_eq!(value, vec![1, 2, 3]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_version_drift_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        tokio::fs::write(&path, br#"{"version": 0, "data": []}"#)
            .await
            .unwrap();

        let err = read_versioned::<Vec<u32>>(&path).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaMismatch { found: Some(0), expected: SCHEMA_VERSION, .. }
        ));
    }

    #[tokio::test]
    async fn test_unversioned_file_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        tokio::fs::write(&path, b"[1, 2, 3]").await.unwrap();

        let err = read_versioned::<Vec<u32>>(&path).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { found: None, .. }));
    }
}
