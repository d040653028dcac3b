use anyhow::{Context, Result};
use deadpool_postgres::Pool;

use crate::models::*;

/// Tables used by the posting store
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    track_id      TEXT PRIMARY KEY,
    posting_count BIGINT NOT NULL DEFAULT 0,
    indexed_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS postings (
    id           BIGSERIAL PRIMARY KEY,
    hash         BIGINT NOT NULL,
    track_id     TEXT NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
    frame_offset INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS postings_hash_idx ON postings (hash);
CREATE INDEX IF NOT EXISTS postings_track_idx ON postings (track_id);
";

/// Create the posting tables if they do not exist
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(SCHEMA)
        .await
        .context("Failed to create posting schema")?;
    Ok(())
}

/// Insert every posting of one track inside a single transaction.
/// Either all rows become visible or none do.
pub async fn insert_track_postings(
    pool: &Pool,
    track_id: &str,
    postings: &[NewPosting],
) -> Result<u64> {
    let mut client = pool.get().await?;
    let tx = client
        .transaction()
        .await
        .context("Failed to open insert transaction")?;

    tx.execute(
        "INSERT INTO tracks (track_id, posting_count)
         VALUES ($1, $2)
         ON CONFLICT (track_id)
         DO UPDATE SET posting_count = tracks.posting_count + EXCLUDED.posting_count,
                       indexed_at = now()",
        &[&track_id, &(postings.len() as i64)],
    )
    .await
    .context("Failed to upsert track")?;

    let inserted = if postings.is_empty() {
        0
    } else {
        // Build the JSONB array
        let json_array =
            serde_json::to_value(postings).context("Failed to serialize postings")?;

        tx.execute(
            "INSERT INTO postings (hash, track_id, frame_offset)
             SELECT
                 (p->>'hash')::BIGINT,
                 $1::TEXT,
                 (p->>'frame_offset')::INTEGER
             FROM jsonb_array_elements($2::jsonb) WITH ORDINALITY AS t(p, n)
             ORDER BY n",
            &[&track_id, &json_array],
        )
        .await
        .context("Failed to batch insert postings")?
    };

    tx.commit().await.context("Failed to commit postings")?;
    log::debug!("Inserted {} postings for track '{}'", inserted, track_id);

    Ok(inserted)
}

/// Fetch all postings for a set of hashes, in insertion order
pub async fn get_postings_by_hashes(pool: &Pool, hashes: &[i64]) -> Result<Vec<PostingRow>> {
    if hashes.is_empty() {
        return Ok(Vec::new());
    }

    let client = pool.get().await?;

    let rows = client
        .query(
            "SELECT id, hash, track_id, frame_offset
             FROM postings
             WHERE hash = ANY($1)
             ORDER BY id",
            &[&hashes],
        )
        .await
        .context("Failed to get postings by hash")?;
    log::debug!("Looked up {} hashes: {} postings", hashes.len(), rows.len());

    Ok(rows
        .iter()
        .map(|r| PostingRow {
            id: r.get(0),
            hash: r.get(1),
            track_id: r.get(2),
            frame_offset: r.get(3),
        })
        .collect())
}

/// Delete a track and its postings (cascades). Returns the removed posting count.
pub async fn delete_track(pool: &Pool, track_id: &str) -> Result<u64> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let removed = tx
        .execute("DELETE FROM postings WHERE track_id = $1", &[&track_id])
        .await
        .context("Failed to delete postings")?;
    tx.execute("DELETE FROM tracks WHERE track_id = $1", &[&track_id])
        .await
        .context("Failed to delete track")?;

    tx.commit().await?;
    Ok(removed)
}

pub async fn count_tracks(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let row = client
        .query_one("SELECT COUNT(*) FROM tracks", &[])
        .await
        .context("Failed to count tracks")?;
    let count: i64 = row.get(0);
    Ok(count as u64)
}

pub async fn count_postings(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let row = client
        .query_one("SELECT COUNT(*) FROM postings", &[])
        .await
        .context("Failed to count postings")?;
    let count: i64 = row.get(0);
    Ok(count as u64)
}
