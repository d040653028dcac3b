use serde::{Deserialize, Serialize};

/// A posting row as stored in the `postings` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRow {
    pub id: i64,
    pub hash: i64,
    pub track_id: String,
    pub frame_offset: i32,
}

/// Input structure for inserting a posting. `hash` and `frame_offset` are
/// the bit-exact signed images of the engine's unsigned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPosting {
    pub hash: i64,
    pub frame_offset: i32,
}

