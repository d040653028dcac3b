//! JSON output formatting
//!
//! Everything the tool prints on stdout is one JSON object.

use serde_json::{json, Value};
use tunematch_core::{IndexReport, MatchResult};

/// One query answer: the match details, or `match_found: false` with the
/// best score seen
pub fn match_json(result: &MatchResult) -> Value {
    match (&result.track_id, result.offset_frames) {
        // "offset" is in frames
        (Some(track_id), Some(offset)) if result.match_found => json!({
            "track_id": track_id,
            "offset": offset,
            "offset_seconds": result.offset_seconds.unwrap_or(0.0),
            "score": result.score,
            "match_found": true,
            "votes": result.votes,
            "matched_hashes": result.matched_hashes,
            "query_hashes": result.query_hashes,
        }),
        _ => json!({
            "match_found": false,
            "score": result.score,
        }),
    }
}

/// Ranked answers for `recognize --top`
pub fn matches_json(results: &[MatchResult]) -> Value {
    let matches: Vec<Value> = results
        .iter()
        .filter(|r| r.match_found)
        .map(match_json)
        .collect();
    if matches.is_empty() {
        return results
            .first()
            .map(match_json)
            .unwrap_or_else(|| json!({"match_found": false, "score": 0.0}));
    }
    json!({
        "match_found": true,
        "detections": matches.len(),
        "results": matches,
    })
}

pub fn index_json(reports: &[IndexReport]) -> Value {
    let total: usize = reports.iter().map(|r| r.fingerprints).sum();
    json!({
        "indexed": reports,
        "tracks": reports.len(),
        "total_fingerprints": total,
    })
}

pub fn delete_json(track_id: &str, removed: usize) -> Value {
    json!({
        "track_id": track_id,
        "removed": removed,
    })
}

/// `{"error": ...}` with the whole context chain in one line
pub fn error_json(err: &anyhow::Error) -> Value {
    json!({ "error": format!("{:#}", err) })
}

/// Print a JSON value on stdout
pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(track_id: &str, offset: i64, score: f64) -> MatchResult {
        MatchResult {
            track_id: Some(track_id.to_string()),
            offset_frames: Some(offset),
            offset_seconds: Some(offset as f64 * 0.5),
            score,
            match_found: true,
            votes: 8,
            matched_hashes: 10,
            query_hashes: 12,
        }
    }

    #[test]
    fn test_match_shape() {
        let value = match_json(&found("song1", 5, 0.8));
        assert_eq!(value["track_id"], json!("song1"));
        assert_eq!(value["offset"], json!(5));
        assert_eq!(value["offset_seconds"], json!(2.5));
        assert_eq!(value["score"], json!(0.8));
        assert_eq!(value["match_found"], json!(true));
    }

    #[test]
    fn test_no_match_shape() {
        let value = match_json(&MatchResult::no_match(0.1, 1, 10, 10));
        assert_eq!(value, json!({"match_found": false, "score": 0.1}));
    }

    #[test]
    fn test_top_results() {
        let value = matches_json(&[found("a", 1, 0.9), found("b", 3, 0.4)]);
        assert_eq!(value["detections"], json!(2));
        assert_eq!(value["results"][1]["track_id"], json!("b"));

        let none = matches_json(&[MatchResult::no_match(0.0, 0, 0, 4)]);
        assert_eq!(none["match_found"], json!(false));
    }

    #[test]
    fn test_index_and_delete_shapes() {
        let reports = vec![
            IndexReport {
                track_id: "a".to_string(),
                fingerprints: 10,
                replaced: 0,
            },
            IndexReport {
                track_id: "b".to_string(),
                fingerprints: 5,
                replaced: 3,
            },
        ];
        let value = index_json(&reports);
        assert_eq!(value["total_fingerprints"], json!(15));
        assert_eq!(value["indexed"][1]["replaced"], json!(3));

        assert_eq!(delete_json("a", 10), json!({"track_id": "a", "removed": 10}));
    }

    #[test]
    fn test_error_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("store unavailable");
        assert_eq!(
            error_json(&err),
            json!({"error": "store unavailable: connection refused"})
        );
    }
}
