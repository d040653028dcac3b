//! tunematch Database Layer
//!
//! PostgreSQL storage for fingerprint postings

pub mod connection;
pub mod models;
pub mod operations;

// Re-export commonly used types
pub use connection::{create_pool, test_connection, DbPool};
pub use models::{NewPosting, PostingRow};
pub use operations::{
    count_postings, count_tracks, delete_track, ensure_schema, get_postings_by_hashes,
    insert_track_postings, SCHEMA,
};
