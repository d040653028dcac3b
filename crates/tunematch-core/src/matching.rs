//! Offset-histogram matching and query results

use crate::config::MatchingConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::storage_backend::{bounded, FingerprintStore, Posting};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Best-aligned offset of one reference track for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub track_id: String,
    /// Reference frame minus query frame of the winning histogram bucket
    pub offset_frames: i64,
    pub votes: usize,
    pub score: f64,
}

/// Ranked candidates plus the counters the score is derived from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub candidates: Vec<MatchCandidate>,
    /// Query fingerprints considered (after `fingerprint_limit`)
    pub query_hashes: usize,
    /// Query fingerprints whose hash returned at least one posting
    pub matched_hashes: usize,
}

/// Answer to one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    /// Position of the query start inside the reference, in frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_frames: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_seconds: Option<f64>,
    pub score: f64,
    pub match_found: bool,
    pub votes: usize,
    pub matched_hashes: usize,
    pub query_hashes: usize,
}

impl MatchResult {
    /// Negative answer carrying the best score seen
    pub fn no_match(score: f64, votes: usize, matched_hashes: usize, query_hashes: usize) -> Self {
        Self {
            track_id: None,
            offset_frames: None,
            offset_seconds: None,
            score,
            match_found: false,
            votes,
            matched_hashes,
            query_hashes,
        }
    }

    fn found(candidate: &MatchCandidate, ranking: &Ranking, frame_duration_s: f64) -> Self {
        Self {
            track_id: Some(candidate.track_id.clone()),
            offset_frames: Some(candidate.offset_frames),
            offset_seconds: Some(candidate.offset_frames as f64 * frame_duration_s),
            score: candidate.score,
            match_found: true,
            votes: candidate.votes,
            matched_hashes: ranking.matched_hashes,
            query_hashes: ranking.query_hashes,
        }
    }
}

/// Matcher for query fingerprints
#[derive(Debug, Clone)]
pub struct Matcher {
    match_threshold: f64,
    fingerprint_limit: usize,
    store_timeout: Duration,
}

impl Matcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            match_threshold: config.match_threshold,
            fingerprint_limit: config.fingerprint_limit,
            store_timeout: config.store_timeout(),
        }
    }

    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    /// Leading fingerprints kept under `fingerprint_limit` (0 keeps all)
    pub fn limit_query<'a>(&self, query: &'a [Fingerprint]) -> &'a [Fingerprint] {
        if self.fingerprint_limit > 0 && query.len() > self.fingerprint_limit {
            &query[..self.fingerprint_limit]
        } else {
            query
        }
    }

    /// Look up the query in `store` and rank at most `top_n` tracks
    pub async fn find_candidates(
        &self,
        query: &[Fingerprint],
        store: &dyn FingerprintStore,
        top_n: usize,
    ) -> Result<Ranking> {
        let query = self.limit_query(query);
        if query.is_empty() {
            return Ok(Ranking::default());
        }

        let mut hashes: Vec<u64> = query.iter().map(|fp| fp.hash).collect();
        hashes.sort_unstable();
        hashes.dedup();

        let postings = bounded(self.store_timeout, "lookup", store.lookup(&hashes)).await?;
        log::debug!(
            "Lookup of {} distinct hashes returned {} keys",
            hashes.len(),
            postings.len()
        );

        Ok(self.rank(query, &postings, top_n))
    }

    /// Build per-track offset histograms and rank tracks by their best bucket.
    ///
    /// Each query fingerprint votes at most once per `(track, delta)`, so
    /// no score can exceed 1.
    pub fn rank(
        &self,
        query: &[Fingerprint],
        postings: &HashMap<u64, Vec<Posting>>,
        top_n: usize,
    ) -> Ranking {
        let mut histograms: HashMap<&str, HashMap<i64, usize>> = HashMap::new();
        let mut matched_hashes = 0;
        let mut votes: Vec<(&str, i64)> = Vec::new();

        for fp in query {
            let Some(list) = postings.get(&fp.hash).filter(|l| !l.is_empty()) else {
                continue;
            };
            matched_hashes += 1;

            votes.clear();
            votes.extend(
                list.iter()
                    .map(|p| (p.track_id.as_str(), p.offset as i64 - fp.offset as i64)),
            );
            votes.sort_unstable();
            votes.dedup();

            for &(track_id, delta) in &votes {
                *histograms
                    .entry(track_id)
                    .or_default()
                    .entry(delta)
                    .or_insert(0) += 1;
            }
        }

        let mut candidates: Vec<MatchCandidate> = histograms
            .into_iter()
            .filter_map(|(track_id, histogram)| {
                // Mode of the histogram, smaller delta on ties
                histogram
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(delta, count)| MatchCandidate {
                        track_id: track_id.to_string(),
                        offset_frames: delta,
                        votes: count,
                        score: count as f64 / matched_hashes as f64,
                    })
            })
            .collect();

        candidates.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.track_id.cmp(&b.track_id)));
        candidates.truncate(top_n);

        log::trace!(
            "{} of {} query hashes matched, top candidate {:?}",
            matched_hashes,
            query.len(),
            candidates.first()
        );

        Ranking {
            candidates,
            query_hashes: query.len(),
            matched_hashes,
        }
    }

    /// Thresholded answer from the top candidate
    pub fn best(&self, ranking: &Ranking, frame_duration_s: f64) -> MatchResult {
        let Some(top) = ranking.candidates.first() else {
            return MatchResult::no_match(0.0, 0, ranking.matched_hashes, ranking.query_hashes);
        };
        if ranking.matched_hashes > 0 && top.score >= self.match_threshold {
            MatchResult::found(top, ranking, frame_duration_s)
        } else {
            MatchResult::no_match(top.score, top.votes, ranking.matched_hashes, ranking.query_hashes)
        }
    }

    /// Every candidate that clears the threshold, or a single negative result
    pub fn resolve(&self, ranking: &Ranking, frame_duration_s: f64) -> Vec<MatchResult> {
        let results: Vec<MatchResult> = ranking
            .candidates
            .iter()
            .filter(|c| ranking.matched_hashes > 0 && c.score >= self.match_threshold)
            .map(|c| MatchResult::found(c, ranking, frame_duration_s))
            .collect();

        if results.is_empty() {
            vec![self.best(ranking, frame_duration_s)]
        } else {
            results
        }
    }
}
