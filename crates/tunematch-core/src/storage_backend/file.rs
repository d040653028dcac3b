//! Snapshot-file backed store
//!
//! Keeps the posting index in memory and rewrites the snapshot file after
//! each mutation. Files ending in `.json` use the JSON rendering, anything
//! else the binary format.

use super::{check_track_id, FingerprintStore, Posting, PostingIndex};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tunematch_fp::{SnapshotJson, SnapshotReader, SnapshotWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotFormat {
    Binary,
    Json,
}

impl SnapshotFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Binary,
        }
    }
}

pub struct FileStore {
    path: PathBuf,
    format: SnapshotFormat,
    writer: SnapshotWriter,
    index: RwLock<PostingIndex>,
}

impl FileStore {
    /// Open the snapshot at `path`, starting empty when it does not exist yet
    pub fn open(path: &Path) -> Result<Self> {
        let format = SnapshotFormat::for_path(path);

        let index = if path.exists() {
            let snapshot = match format {
                SnapshotFormat::Binary => SnapshotReader::read(path),
                SnapshotFormat::Json => SnapshotJson::load(path).map(SnapshotJson::into_snapshot),
            }
            .map_err(|e| Error::Storage(format!("{:#}", e)))?;
            PostingIndex::from_snapshot(snapshot)?
        } else {
            PostingIndex::new()
        };

        log::debug!(
            "Opened snapshot {} ({} tracks, {} postings)",
            path.display(),
            index.track_count(),
            index.posting_count()
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer: SnapshotWriter::new(),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, index: &PostingIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let snapshot = index.to_snapshot();
        match self.format {
            SnapshotFormat::Binary => self.writer.write(&self.path, &snapshot),
            SnapshotFormat::Json => SnapshotJson::from_snapshot(&snapshot).save(&self.path),
        }
        .map_err(|e| Error::Storage(format!("{:#}", e)))
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreUnavailable("snapshot lock poisoned".to_string())
}

#[async_trait]
impl FingerprintStore for FileStore {
    async fn insert(&self, track_id: &str, fingerprints: &[Fingerprint]) -> Result<usize> {
        check_track_id(track_id)?;
        let mut index = self.index.write().map_err(poisoned)?;

        let undo = index.append(track_id, fingerprints);
        if let Err(e) = self.persist(&index) {
            index.rollback(undo);
            log::warn!("Insert of '{}' rolled back: {}", track_id, e);
            return Err(e);
        }
        Ok(fingerprints.len())
    }

    async fn lookup(&self, hashes: &[u64]) -> Result<HashMap<u64, Vec<Posting>>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.lookup(hashes))
    }

    async fn delete(&self, track_id: &str) -> Result<usize> {
        check_track_id(track_id)?;
        let mut index = self.index.write().map_err(poisoned)?;
        if !index.contains_track(track_id) {
            return Ok(0);
        }

        let backup = index.clone();
        let removed = index.remove_track(track_id);
        if let Err(e) = self.persist(&index) {
            *index = backup;
            return Err(e);
        }
        Ok(removed)
    }

    async fn track_count(&self) -> Result<usize> {
        Ok(self.index.read().map_err(poisoned)?.track_count())
    }

    async fn posting_count(&self) -> Result<usize> {
        Ok(self.index.read().map_err(poisoned)?.posting_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fps(pairs: &[(u64, u32)]) -> Vec<Fingerprint> {
        pairs.iter().map(|&(h, o)| Fingerprint::new(h, o)).collect()
    }

    #[tokio::test]
    async fn test_binary_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.tmps");

        let store = FileStore::open(&path).unwrap();
        store.insert("a", &fps(&[(1, 10), (2, 20)])).await.unwrap();
        store.insert("b", &fps(&[(1, 4)])).await.unwrap();
        store.delete("b").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.track_count().await.unwrap(), 1);
        let found = reopened.lookup(&[1, 2]).await.unwrap();
        assert_eq!(found[&1].len(), 1);
        assert_eq!(found[&1][0].track_id, "a");
        assert_eq!(found[&2][0].offset, 20);
    }

    #[tokio::test]
    async fn test_json_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("index.json");

        let store = FileStore::open(&path).unwrap();
        store.insert("song", &fps(&[(u64::from(u32::MAX) << 16, 3)])).await.unwrap();
        drop(store);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"song\""));

        let reopened = FileStore::open(&path).unwrap();
        let found = reopened.lookup(&[u64::from(u32::MAX) << 16]).await.unwrap();
        assert_eq!(found.values().next().unwrap()[0].offset, 3);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        // The snapshot path is a directory, so every write fails
        let path = dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();

        let store = FileStore {
            path: path.clone(),
            format: SnapshotFormat::Binary,
            writer: SnapshotWriter::new(),
            index: RwLock::new(PostingIndex::new()),
        };

        let err = store.insert("a", &fps(&[(1, 1), (2, 2)])).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.posting_count().await.unwrap(), 0);
        assert_eq!(store.track_count().await.unwrap(), 0);
        assert!(store.lookup(&[1, 2]).await.unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tmps");
        std::fs::write(&path, b"definitely not a snapshot file at all, no").unwrap();
        assert!(matches!(FileStore::open(&path), Err(Error::Storage(_))));
    }
}
