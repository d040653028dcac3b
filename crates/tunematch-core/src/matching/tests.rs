//! Tests for offset-histogram matching

use super::*;
use crate::storage_backend::MemoryStore;

fn fps(pairs: &[(u64, u32)]) -> Vec<Fingerprint> {
    pairs.iter().map(|&(h, o)| Fingerprint::new(h, o)).collect()
}

fn matcher(threshold: f64) -> Matcher {
    Matcher::new(&MatchingConfig {
        match_threshold: threshold,
        ..Default::default()
    })
}

fn postings(entries: &[(u64, &str, u32)]) -> HashMap<u64, Vec<Posting>> {
    let mut map: HashMap<u64, Vec<Posting>> = HashMap::new();
    for &(hash, track_id, offset) in entries {
        map.entry(hash).or_default().push(Posting {
            track_id: track_id.to_string(),
            offset,
        });
    }
    map
}

#[test]
fn test_aligned_votes_win() {
    // Track "a" aligns at delta 100 for three hashes, "b" scatters
    let index = postings(&[
        (1, "a", 110),
        (2, "a", 120),
        (3, "a", 130),
        (1, "b", 5),
        (2, "b", 50),
        (3, "b", 7),
    ]);
    let query = fps(&[(1, 10), (2, 20), (3, 30), (4, 40)]);

    let ranking = matcher(0.2).rank(&query, &index, 10);
    assert_eq!(ranking.query_hashes, 4);
    assert_eq!(ranking.matched_hashes, 3);

    let top = &ranking.candidates[0];
    assert_eq!(top.track_id, "a");
    assert_eq!(top.offset_frames, 100);
    assert_eq!(top.votes, 3);
    approx::assert_relative_eq!(top.score, 1.0);

    assert_eq!(ranking.candidates[1].track_id, "b");
    assert_eq!(ranking.candidates[1].votes, 1);
}

#[test]
fn test_negative_offsets_are_kept() {
    let index = postings(&[(1, "a", 0), (2, "a", 10)]);
    let query = fps(&[(1, 5), (2, 15)]);
    let ranking = matcher(0.2).rank(&query, &index, 1);
    assert_eq!(ranking.candidates[0].offset_frames, -5);
}

#[test]
fn test_mode_tie_prefers_smaller_delta() {
    let index = postings(&[(1, "a", 10), (2, "a", 30)]);
    let query = fps(&[(1, 0), (2, 0)]);
    let ranking = matcher(0.0).rank(&query, &index, 1);
    assert_eq!(ranking.candidates[0].offset_frames, 10);
    assert_eq!(ranking.candidates[0].votes, 1);
}

#[test]
fn test_vote_tie_prefers_smaller_track_id() {
    let index = postings(&[(1, "zeta", 3), (1, "alpha", 3), (1, "mid", 3)]);
    let query = fps(&[(1, 0)]);
    let ranking = matcher(0.2).rank(&query, &index, 2);
    let ids: Vec<&str> = ranking
        .candidates
        .iter()
        .map(|c| c.track_id.as_str())
        .collect();
    assert_eq!(ids, vec!["alpha", "mid"]);
}

#[test]
fn test_duplicate_postings_vote_once_per_bucket() {
    let index = postings(&[(1, "a", 4), (1, "a", 4), (1, "a", 9)]);
    let query = fps(&[(1, 0)]);
    let ranking = matcher(0.2).rank(&query, &index, 1);
    assert_eq!(ranking.candidates[0].votes, 1);
    assert!(ranking.candidates[0].score <= 1.0);
}

#[test]
fn test_threshold_is_inclusive() {
    // One of four matched hashes lands in the winning bucket: score 0.25
    let index = postings(&[(1, "a", 10), (2, "a", 50), (3, "a", 70), (4, "a", 95)]);
    let query = fps(&[(1, 0), (2, 1), (3, 2), (4, 3)]);
    let ranking = matcher(0.25).rank(&query, &index, 1);
    approx::assert_relative_eq!(ranking.candidates[0].score, 0.25);

    let found = matcher(0.25).best(&ranking, 0.5);
    assert!(found.match_found);
    assert_eq!(found.track_id.as_deref(), Some("a"));
    assert_eq!(found.offset_frames, Some(10));
    approx::assert_relative_eq!(found.offset_seconds.unwrap(), 5.0);

    let missed = matcher(0.26).best(&ranking, 0.5);
    assert!(!missed.match_found);
    assert!(missed.track_id.is_none());
    assert!(missed.offset_frames.is_none());
    approx::assert_relative_eq!(missed.score, 0.25);

    // The smallest step above the score already misses
    let just_above = 0.25 + f64::EPSILON;
    assert!(just_above > 0.25);
    assert!(!matcher(just_above).best(&ranking, 0.5).match_found);
}

#[test]
fn test_monotonic_in_aligned_hashes() {
    let m = matcher(0.0);
    let mut entries = vec![(100, "a", 500), (101, "a", 77), (102, "a", 900)];
    let mut query = fps(&[(100, 0), (101, 1), (102, 2)]);
    let mut last = m.rank(&query, &postings(&entries), 1).candidates[0].score;

    for k in 0..5u32 {
        let hash = 200 + k as u64;
        entries.push((hash, "a", 500 + 10 + k));
        query.push(Fingerprint::new(hash, 10 + k));
        let score = m.rank(&query, &postings(&entries), 1).candidates[0].score;
        assert!(score >= last, "score dropped from {} to {}", last, score);
        last = score;
    }
}

#[test]
fn test_no_postings_is_no_match() {
    let ranking = matcher(0.0).rank(&fps(&[(1, 0)]), &HashMap::new(), 5);
    assert!(ranking.candidates.is_empty());
    assert_eq!(ranking.matched_hashes, 0);

    let result = matcher(0.0).best(&ranking, 0.1);
    assert!(!result.match_found);
    assert_eq!(result.score, 0.0);
}

#[test]
fn test_fingerprint_limit_truncates_query() {
    let m = Matcher::new(&MatchingConfig {
        fingerprint_limit: 2,
        ..Default::default()
    });
    let query = fps(&[(1, 0), (2, 1), (3, 2)]);
    assert_eq!(m.limit_query(&query).len(), 2);
    assert_eq!(matcher(0.2).limit_query(&query).len(), 3);
}

#[test]
fn test_resolve_lists_passing_candidates() {
    let index = postings(&[(1, "a", 5), (2, "a", 6), (1, "b", 9)]);
    let query = fps(&[(1, 0), (2, 1)]);
    let m = matcher(0.5);
    let ranking = m.rank(&query, &index, 5);

    let results = m.resolve(&ranking, 1.0);
    let ids: Vec<_> = results.iter().map(|r| r.track_id.clone()).collect();
    assert_eq!(ids, vec![Some("a".to_string()), Some("b".to_string())]);

    let strict = matcher(0.9).resolve(&ranking, 1.0);
    assert_eq!(strict.len(), 1);
    assert!(strict[0].match_found);

    let none = matcher(1.0).resolve(&m.rank(&fps(&[(9, 0)]), &index, 5), 1.0);
    assert_eq!(none.len(), 1);
    assert!(!none[0].match_found);
}

#[tokio::test]
async fn test_empty_store_is_no_match() {
    let store = MemoryStore::new();
    let m = matcher(0.2);
    let ranking = m
        .find_candidates(&fps(&[(1, 0), (2, 3)]), &store, 5)
        .await
        .unwrap();
    let result = m.best(&ranking, 0.05);
    assert!(!result.match_found);
    assert_eq!(result.score, 0.0);
    assert_eq!(result.query_hashes, 2);
}

#[tokio::test]
async fn test_find_candidates_through_store() {
    let store = MemoryStore::new();
    store
        .insert("ref", &fps(&[(1, 40), (2, 41), (3, 42)]))
        .await
        .unwrap();
    store.insert("other", &fps(&[(3, 1)])).await.unwrap();

    let m = matcher(0.5);
    let ranking = m
        .find_candidates(&fps(&[(1, 0), (2, 1), (3, 2), (1, 0)]), &store, 5)
        .await
        .unwrap();
    assert_eq!(ranking.matched_hashes, 4);

    let result = m.best(&ranking, 0.1);
    assert!(result.match_found);
    assert_eq!(result.track_id.as_deref(), Some("ref"));
    assert_eq!(result.offset_frames, Some(40));
    approx::assert_relative_eq!(result.score, 1.0);
}

#[test]
fn test_result_json_omits_absent_fields() {
    let json = serde_json::to_value(MatchResult::no_match(0.0, 0, 0, 3)).unwrap();
    assert_eq!(json["match_found"], serde_json::json!(false));
    assert!(json.get("track_id").is_none());
    assert!(json.get("offset_seconds").is_none());
}
