//! JSON rendering of an index snapshot
//!
//! Groups postings by track so a dump can be read and diffed by hand.

use crate::format::{PostingRecord, Snapshot};
use crate::writer::replace_file;
use serde::{Deserialize, Serialize};

/// Complete JSON snapshot structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotJson {
    pub version: String,
    pub created_at: String,
    pub tracks: Vec<TrackJson>,
}

/// All postings of one track as `[hash, offset]` pairs, in insertion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackJson {
    pub track_id: String,
    pub postings: Vec<(u64, u32)>,
}

impl SnapshotJson {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut tracks: Vec<TrackJson> = snapshot
            .tracks
            .iter()
            .map(|track_id| TrackJson {
                track_id: track_id.clone(),
                postings: Vec::new(),
            })
            .collect();

        for record in &snapshot.postings {
            if let Some(track) = tracks.get_mut(record.track as usize) {
                track.postings.push((record.hash, record.offset));
            }
        }

        Self {
            version: "1.0".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tracks,
        }
    }

    /// Rebuild the snapshot. Postings come back grouped by track; per-hash
    /// insertion order within each track is preserved.
    pub fn into_snapshot(self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (index, track) in self.tracks.into_iter().enumerate() {
            snapshot.tracks.push(track.track_id);
            snapshot
                .postings
                .extend(track.postings.into_iter().map(|(hash, offset)| PostingRecord {
                    hash,
                    track: index as u32,
                    offset,
                }));
        }
        snapshot
    }

    /// Save to JSON file, replacing any previous file atomically
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json_str = serde_json::to_string_pretty(self)?;
        replace_file(path, json_str.as_bytes())
    }

    /// Load from JSON file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json_str = std::fs::read_to_string(path)?;
        let snapshot: SnapshotJson = serde_json::from_str(&json_str)?;
        Ok(snapshot)
    }
}
