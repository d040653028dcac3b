//! Ingestion and query entry points over a fingerprint store

use crate::config::{FingerprintConfig, MatchingConfig};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::matching::{MatchResult, Matcher};
use crate::pipeline::Fingerprinter;
use crate::storage_backend::{bounded, check_track_id, open_store, FingerprintStore};
use crate::storage_config::Settings;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of indexing one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub track_id: String,
    /// Postings added
    pub fingerprints: usize,
    /// Postings removed first (re-index only)
    pub replaced: usize,
}

pub struct Recognizer {
    fingerprinter: Fingerprinter,
    matcher: Matcher,
    store: Arc<dyn FingerprintStore>,
    store_timeout: Duration,
}

impl Recognizer {
    pub fn new(
        config: FingerprintConfig,
        matching: MatchingConfig,
        store: Arc<dyn FingerprintStore>,
    ) -> Result<Self> {
        matching.validate()?;
        Ok(Self {
            fingerprinter: Fingerprinter::new(config)?,
            matcher: Matcher::new(&matching),
            store,
            store_timeout: matching.store_timeout(),
        })
    }

    /// Open the configured store and build a recognizer over it
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let timeout = settings.matching.store_timeout();
        let store = bounded(timeout, "connect", open_store(&settings.storage, timeout)).await?;
        Self::new(settings.fingerprint.clone(), settings.matching.clone(), store)
    }

    pub fn config(&self) -> &FingerprintConfig {
        self.fingerprinter.config()
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    pub fn fingerprint(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Fingerprint>> {
        self.fingerprinter.fingerprint(samples, sample_rate)
    }

    /// Fingerprint `samples` and append them under `track_id`
    pub async fn index_track(
        &self,
        track_id: &str,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<IndexReport> {
        check_track_id(track_id)?;
        let fingerprints = self.fingerprint(samples, sample_rate)?;
        self.store_fingerprints(track_id, &fingerprints, 0).await
    }

    /// Replace whatever `track_id` had with a fresh fingerprint set
    pub async fn reindex_track(
        &self,
        track_id: &str,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<IndexReport> {
        check_track_id(track_id)?;
        let fingerprints = self.fingerprint(samples, sample_rate)?;
        let replaced = self.delete_track(track_id).await?;
        self.store_fingerprints(track_id, &fingerprints, replaced).await
    }

    /// Fingerprint a batch in parallel, then insert each track.
    ///
    /// Every buffer is validated before anything is written.
    pub async fn index_tracks(
        &self,
        tracks: &[(&str, &[f32])],
        sample_rate: u32,
    ) -> Result<Vec<IndexReport>> {
        for (track_id, _) in tracks {
            check_track_id(track_id)?;
        }

        let fingerprinted: Vec<Vec<Fingerprint>> = tracks
            .par_iter()
            .map(|(_, samples)| self.fingerprint(samples, sample_rate))
            .collect::<Result<_>>()?;

        let mut reports = Vec::with_capacity(tracks.len());
        for ((track_id, _), fingerprints) in tracks.iter().zip(&fingerprinted) {
            reports.push(self.store_fingerprints(track_id, fingerprints, 0).await?);
        }
        Ok(reports)
    }

    pub async fn delete_track(&self, track_id: &str) -> Result<usize> {
        check_track_id(track_id)?;
        let removed = bounded(self.store_timeout, "delete", self.store.delete(track_id)).await?;
        log::info!("Deleted '{}' ({} postings)", track_id, removed);
        Ok(removed)
    }

    /// Best match for a query buffer
    pub async fn recognize(&self, samples: &[f32], sample_rate: u32) -> Result<MatchResult> {
        let fingerprints = self.fingerprint(samples, sample_rate)?;
        let ranking = self
            .matcher
            .find_candidates(&fingerprints, self.store.as_ref(), 1)
            .await?;
        let result = self.matcher.best(&ranking, self.config().frame_duration_s());
        self.log_result(&result);
        Ok(result)
    }

    /// Up to `top_n` tracks clearing the threshold, or one negative result
    pub async fn recognize_top(
        &self,
        samples: &[f32],
        sample_rate: u32,
        top_n: usize,
    ) -> Result<Vec<MatchResult>> {
        if top_n == 0 {
            return Err(Error::input("top_n must be at least 1"));
        }
        let fingerprints = self.fingerprint(samples, sample_rate)?;
        let ranking = self
            .matcher
            .find_candidates(&fingerprints, self.store.as_ref(), top_n)
            .await?;
        let results = self.matcher.resolve(&ranking, self.config().frame_duration_s());
        if let Some(first) = results.first() {
            self.log_result(first);
        }
        Ok(results)
    }

    async fn store_fingerprints(
        &self,
        track_id: &str,
        fingerprints: &[Fingerprint],
        replaced: usize,
    ) -> Result<IndexReport> {
        let inserted = bounded(
            self.store_timeout,
            "insert",
            self.store.insert(track_id, fingerprints),
        )
        .await?;

        log::info!("Indexed '{}': {} fingerprints", track_id, inserted);
        Ok(IndexReport {
            track_id: track_id.to_string(),
            fingerprints: inserted,
            replaced,
        })
    }

    fn log_result(&self, result: &MatchResult) {
        match &result.track_id {
            Some(track_id) if result.match_found => log::info!(
                "Matched '{}' at {:.3}s, score {:.3} ({}/{} hashes)",
                track_id,
                result.offset_seconds.unwrap_or(0.0),
                result.score,
                result.votes,
                result.matched_hashes
            ),
            _ => log::info!(
                "No match (best score {:.3}, threshold {:.3})",
                result.score,
                self.matcher.match_threshold()
            ),
        }
    }
}
