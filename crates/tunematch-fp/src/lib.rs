//! Posting snapshot file format
//!
//! Binary and JSON renderings of a fingerprint index: a track table plus one
//! `(hash, track, offset)` record per posting.

pub mod format;
pub mod json_format;
pub mod reader;
pub mod writer;

pub use format::{FormatError, PostingRecord, Snapshot, SnapshotHeader, HEADER_SIZE, MAGIC, VERSION};
pub use json_format::{SnapshotJson, TrackJson};
pub use reader::SnapshotReader;
pub use writer::SnapshotWriter;
