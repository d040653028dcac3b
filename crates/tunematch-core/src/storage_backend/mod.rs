//! Fingerprint store trait and implementations
//!
//! A store maps each fingerprint hash to the postings recorded for it, in
//! insertion order. Backends: in-memory, snapshot file, PostgreSQL.

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::storage_config::{BackendKind, StorageConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tunematch_fp::{PostingRecord, Snapshot};

pub mod file;
pub mod postgres;

pub use file::FileStore;
pub use postgres::PostgresStore;

/// Where a hash occurs in a reference track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub track_id: String,
    /// Anchor frame index within the track
    pub offset: u32,
}

/// Abstract posting store
///
/// Implementations must accept concurrent inserts for distinct tracks and
/// make each insert visible all at once.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Append one posting per fingerprint. Returns the number appended.
    async fn insert(&self, track_id: &str, fingerprints: &[Fingerprint]) -> Result<usize>;

    /// Postings for each requested hash that exists; absent hashes are omitted
    async fn lookup(&self, hashes: &[u64]) -> Result<HashMap<u64, Vec<Posting>>>;

    /// Remove every posting of a track. Returns the number removed.
    async fn delete(&self, track_id: &str) -> Result<usize>;

    async fn track_count(&self) -> Result<usize>;

    async fn posting_count(&self) -> Result<usize>;
}

pub(crate) fn check_track_id(track_id: &str) -> Result<()> {
    if track_id.trim().is_empty() {
        return Err(Error::input("track_id must not be empty"));
    }
    Ok(())
}

/// Run one store call, failing with `StoreUnavailable` once `timeout` passes
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreUnavailable(format!(
            "{} did not complete within {} ms",
            what,
            timeout.as_millis()
        ))),
    }
}

/// Open the backend selected by `config`
pub async fn open_store(
    config: &StorageConfig,
    timeout: Duration,
) -> Result<Arc<dyn FingerprintStore>> {
    let store: Arc<dyn FingerprintStore> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryStore::new()),
        BackendKind::File => Arc::new(FileStore::open(&config.file.path)?),
        BackendKind::Postgresql => {
            Arc::new(PostgresStore::connect(&config.postgresql, timeout).await?)
        }
    };
    log::debug!("Opened {:?} fingerprint store", config.backend);
    Ok(store)
}

/// What an append changed, so it can be undone exactly
#[derive(Debug)]
pub(crate) struct AppendUndo {
    track: u32,
    new_track: bool,
    /// The track took over a freed slot rather than a new one
    reused_slot: bool,
    /// Posting list length per touched hash before the append
    previous_lengths: HashMap<u64, usize>,
    appended: usize,
}

/// Inverted index shared by the memory and file stores
///
/// Track ids are interned; deleted tracks leave a tombstone slot so the
/// indices held by other postings stay valid. Freed slots are handed to
/// the next new track.
#[derive(Debug, Clone, Default)]
pub(crate) struct PostingIndex {
    tracks: Vec<Option<String>>,
    track_ids: HashMap<String, u32>,
    free_slots: Vec<u32>,
    postings: HashMap<u64, Vec<(u32, u32)>>,
    posting_count: usize,
}

impl PostingIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains_track(&self, track_id: &str) -> bool {
        self.track_ids.contains_key(track_id)
    }

    pub(crate) fn track_count(&self) -> usize {
        self.track_ids.len()
    }

    pub(crate) fn posting_count(&self) -> usize {
        self.posting_count
    }

    pub(crate) fn append(&mut self, track_id: &str, fingerprints: &[Fingerprint]) -> AppendUndo {
        let (track, new_track, reused_slot) = match self.track_ids.get(track_id) {
            Some(&index) => (index, false, false),
            None => {
                let (index, reused) = match self.free_slots.pop() {
                    Some(slot) => {
                        self.tracks[slot as usize] = Some(track_id.to_string());
                        (slot, true)
                    }
                    None => {
                        self.tracks.push(Some(track_id.to_string()));
                        (self.tracks.len() as u32 - 1, false)
                    }
                };
                self.track_ids.insert(track_id.to_string(), index);
                (index, true, reused)
            }
        };

        let mut previous_lengths = HashMap::new();
        for fp in fingerprints {
            let list = self.postings.entry(fp.hash).or_default();
            previous_lengths.entry(fp.hash).or_insert(list.len());
            list.push((track, fp.offset));
        }
        self.posting_count += fingerprints.len();

        AppendUndo {
            track,
            new_track,
            reused_slot,
            previous_lengths,
            appended: fingerprints.len(),
        }
    }

    /// Revert the most recent append. Must be called before any other mutation.
    pub(crate) fn rollback(&mut self, undo: AppendUndo) {
        for (hash, length) in undo.previous_lengths {
            if length == 0 {
                self.postings.remove(&hash);
            } else if let Some(list) = self.postings.get_mut(&hash) {
                list.truncate(length);
            }
        }
        self.posting_count -= undo.appended;

        if undo.new_track {
            let slot = if undo.reused_slot {
                self.free_slots.push(undo.track);
                self.tracks[undo.track as usize].take()
            } else {
                self.tracks.pop().flatten()
            };
            if let Some(track_id) = slot {
                self.track_ids.remove(&track_id);
            }
        }
    }

    pub(crate) fn lookup(&self, hashes: &[u64]) -> HashMap<u64, Vec<Posting>> {
        let mut found = HashMap::new();
        for &hash in hashes {
            if found.contains_key(&hash) {
                continue;
            }
            if let Some(list) = self.postings.get(&hash) {
                let postings: Vec<Posting> = list
                    .iter()
                    .filter_map(|&(track, offset)| {
                        self.track_name(track).map(|track_id| Posting {
                            track_id: track_id.to_string(),
                            offset,
                        })
                    })
                    .collect();
                found.insert(hash, postings);
            }
        }
        found
    }

    pub(crate) fn remove_track(&mut self, track_id: &str) -> usize {
        let Some(track) = self.track_ids.remove(track_id) else {
            return 0;
        };
        self.tracks[track as usize] = None;

        let mut removed = 0;
        self.postings.retain(|_, list| {
            let before = list.len();
            list.retain(|&(t, _)| t != track);
            removed += before - list.len();
            !list.is_empty()
        });
        self.posting_count -= removed;
        // No posting references the slot any more
        self.free_slots.push(track);
        removed
    }

    fn track_name(&self, track: u32) -> Option<&str> {
        self.tracks.get(track as usize).and_then(|t| t.as_deref())
    }

    /// Compact snapshot: tombstones dropped, hashes in ascending order
    pub(crate) fn to_snapshot(&self) -> Snapshot {
        let mut remap = vec![u32::MAX; self.tracks.len()];
        let mut snapshot = Snapshot::new();
        for (old, track) in self.tracks.iter().enumerate() {
            if let Some(track_id) = track {
                remap[old] = snapshot.tracks.len() as u32;
                snapshot.tracks.push(track_id.clone());
            }
        }

        let mut hashes: Vec<u64> = self.postings.keys().copied().collect();
        hashes.sort_unstable();

        snapshot.postings.reserve(self.posting_count);
        for hash in hashes {
            for &(track, offset) in &self.postings[&hash] {
                snapshot.postings.push(PostingRecord {
                    hash,
                    track: remap[track as usize],
                    offset,
                });
            }
        }
        snapshot
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        snapshot
            .validate()
            .map_err(|e| Error::Storage(e.to_string()))?;

        let mut index = Self::new();
        for track_id in snapshot.tracks {
            if index.track_ids.contains_key(&track_id) {
                return Err(Error::Storage(format!(
                    "duplicate track '{}' in snapshot",
                    track_id
                )));
            }
            index
                .track_ids
                .insert(track_id.clone(), index.tracks.len() as u32);
            index.tracks.push(Some(track_id));
        }
        for record in &snapshot.postings {
            index
                .postings
                .entry(record.hash)
                .or_default()
                .push((record.track, record.offset));
        }
        index.posting_count = snapshot.postings.len();
        Ok(index)
    }
}

/// In-memory store. One write lock per insert keeps each track's postings
/// invisible until all of them are appended.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<PostingIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreUnavailable("store lock poisoned".to_string())
}

#[async_trait]
impl FingerprintStore for MemoryStore {
    async fn insert(&self, track_id: &str, fingerprints: &[Fingerprint]) -> Result<usize> {
        check_track_id(track_id)?;
        let mut index = self.index.write().map_err(poisoned)?;
        index.append(track_id, fingerprints);
        Ok(fingerprints.len())
    }

    async fn lookup(&self, hashes: &[u64]) -> Result<HashMap<u64, Vec<Posting>>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.lookup(hashes))
    }

    async fn delete(&self, track_id: &str) -> Result<usize> {
        check_track_id(track_id)?;
        let mut index = self.index.write().map_err(poisoned)?;
        Ok(index.remove_track(track_id))
    }

    async fn track_count(&self) -> Result<usize> {
        Ok(self.index.read().map_err(poisoned)?.track_count())
    }

    async fn posting_count(&self) -> Result<usize> {
        Ok(self.index.read().map_err(poisoned)?.posting_count())
    }
}
