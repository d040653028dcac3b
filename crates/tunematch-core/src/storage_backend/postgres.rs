//! PostgreSQL backed store

use super::{check_track_id, FingerprintStore, Posting};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::storage_config::PostgresqlConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tunematch_db::{DbPool, NewPosting};

pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    /// Create the pool, check the server answers and create the tables
    pub async fn connect(config: &PostgresqlConfig, timeout: Duration) -> Result<Self> {
        let pool = tunematch_db::create_pool(
            &config.host,
            config.port,
            &config.database,
            &config.user,
            &config.password,
            config.max_connections,
            timeout,
        )
        .map_err(Error::unavailable)?;

        tunematch_db::test_connection(&pool)
            .await
            .map_err(Error::unavailable)?;
        tunematch_db::ensure_schema(&pool)
            .await
            .map_err(Error::unavailable)?;

        log::debug!(
            "Connected to postgresql://{}@{}:{}/{}",
            config.user,
            config.host,
            config.port,
            config.database
        );

        Ok(Self { pool })
    }
}

fn to_rows(fingerprints: &[Fingerprint]) -> Result<Vec<NewPosting>> {
    fingerprints
        .iter()
        .map(|fp| {
            let frame_offset = i32::try_from(fp.offset)
                .map_err(|_| Error::input(format!("frame offset {} out of range", fp.offset)))?;
            // Hashes keep their top 16 bits clear, so the cast is exact
            Ok(NewPosting {
                hash: fp.hash as i64,
                frame_offset,
            })
        })
        .collect()
}

#[async_trait]
impl FingerprintStore for PostgresStore {
    async fn insert(&self, track_id: &str, fingerprints: &[Fingerprint]) -> Result<usize> {
        check_track_id(track_id)?;
        let rows = to_rows(fingerprints)?;
        let inserted = tunematch_db::insert_track_postings(&self.pool, track_id, &rows)
            .await
            .map_err(Error::unavailable)?;
        Ok(inserted as usize)
    }

    async fn lookup(&self, hashes: &[u64]) -> Result<HashMap<u64, Vec<Posting>>> {
        let mut keys: Vec<i64> = hashes.iter().map(|&h| h as i64).collect();
        keys.sort_unstable();
        keys.dedup();

        let rows = tunematch_db::get_postings_by_hashes(&self.pool, &keys)
            .await
            .map_err(Error::unavailable)?;

        let mut found: HashMap<u64, Vec<Posting>> = HashMap::new();
        for row in rows {
            let offset = u32::try_from(row.frame_offset)
                .map_err(|_| Error::Storage(format!("negative frame offset in row {}", row.id)))?;
            found.entry(row.hash as u64).or_default().push(Posting {
                track_id: row.track_id,
                offset,
            });
        }
        Ok(found)
    }

    async fn delete(&self, track_id: &str) -> Result<usize> {
        check_track_id(track_id)?;
        let removed = tunematch_db::delete_track(&self.pool, track_id)
            .await
            .map_err(Error::unavailable)?;
        Ok(removed as usize)
    }

    async fn track_count(&self) -> Result<usize> {
        let count = tunematch_db::count_tracks(&self.pool)
            .await
            .map_err(Error::unavailable)?;
        Ok(count as usize)
    }

    async fn posting_count(&self) -> Result<usize> {
        let count = tunematch_db::count_postings(&self.pool)
            .await
            .map_err(Error::unavailable)?;
        Ok(count as usize)
    }
}
