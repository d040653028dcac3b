//! tunematch core - audio fingerprinting and matching
//!
//! PCM is turned into a spectrogram, reduced to strict local maxima, and
//! paired into landmark hashes. Hashes are stored as postings keyed by
//! hash; a query votes on the time offset between its hashes and the
//! stored ones, and the best-aligned track wins.

pub mod audio;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matching;
pub mod peaks;
pub mod pipeline;
pub mod recognizer;
pub mod storage_backend;
pub mod storage_config;
pub mod transform;

pub use config::{FingerprintConfig, MatchingConfig, ThresholdMode};
pub use error::{Error, Result};
pub use fingerprint::{decode_hash, encode_hash, Fingerprint, LandmarkHasher};
pub use matching::{MatchCandidate, MatchResult, Matcher, Ranking};
pub use peaks::{Peak, PeakExtractor, PeakField};
pub use pipeline::{generate_fingerprints, Fingerprinter};
pub use recognizer::{IndexReport, Recognizer};
pub use storage_backend::{
    open_store, FileStore, FingerprintStore, MemoryStore, Posting, PostgresStore,
};
pub use storage_config::{BackendKind, Settings, StorageConfig};
pub use transform::{compute_transform, Spectrogram, SpectrogramBuilder};
