//! Snapshot file reader

use crate::format::{FormatError, Snapshot, SnapshotHeader, HEADER_SIZE};
use crate::writer::snapshot_checksum;
use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub struct SnapshotReader;

impl SnapshotReader {
    /// Read a snapshot file
    pub fn read(path: &Path) -> Result<Snapshot> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot file: {}", path.display()))?;

        // Empty files cannot be mapped on every platform
        if file.metadata()?.len() == 0 {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                available: 0,
            }
            .into());
        }

        // SAFETY: the writer only ever replaces snapshots by rename, so the
        // mapped file is not modified underneath us.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map snapshot file: {}", path.display()))?;

        Self::decode(&mmap).with_context(|| format!("Invalid snapshot file: {}", path.display()))
    }

    /// Decode a snapshot from its on-disk byte form
    pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
        let header = SnapshotHeader::from_bytes(bytes)?;

        let stored_end = HEADER_SIZE as u64 + header.payload_size;
        if (bytes.len() as u64) < stored_end {
            return Err(FormatError::Truncated {
                needed: stored_end as usize,
                available: bytes.len(),
            }
            .into());
        }
        let stored = &bytes[HEADER_SIZE..stored_end as usize];

        let actual = snapshot_checksum(&header, stored);
        if actual != header.checksum {
            return Err(FormatError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            }
            .into());
        }

        if header.is_compressed() {
            let raw = zstd::decode_all(stored).context("Failed to decompress snapshot payload")?;
            Snapshot::decode_payload(&raw, header.track_count, header.posting_count)
        } else {
            Snapshot::decode_payload(stored, header.track_count, header.posting_count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PostingRecord;
    use crate::writer::SnapshotWriter;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            tracks: vec!["song1".to_string(), "song2".to_string()],
            postings: vec![
                PostingRecord { hash: 0x0000_0123_0456_0007, track: 0, offset: 10 },
                PostingRecord { hash: 0x0000_0123_0456_0007, track: 1, offset: 99 },
                PostingRecord { hash: 42, track: 0, offset: 11 },
            ],
        }
    }

    #[test]
    fn test_write_and_read_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tmps");

        SnapshotWriter::new().write(&path, &sample_snapshot()).unwrap();
        let loaded = SnapshotReader::read(&path).unwrap();

        assert_eq!(loaded, sample_snapshot());
        assert!(!dir.path().join("index.tmps.tmp").exists());
    }

    #[test]
    fn test_uncompressed_bytes() {
        let bytes = SnapshotWriter::uncompressed().encode(&sample_snapshot()).unwrap();
        let header = SnapshotHeader::from_bytes(&bytes).unwrap();
        assert!(!header.is_compressed());
        assert_eq!(header.posting_count, 3);
        assert_eq!(SnapshotReader::decode(&bytes).unwrap(), sample_snapshot());
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut bytes = SnapshotWriter::uncompressed().encode(&sample_snapshot()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = SnapshotReader::decode(&bytes).unwrap_err();
        let format_err = err.downcast_ref::<FormatError>().unwrap();
        assert!(matches!(format_err, FormatError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_corrupted_header_counts_detected() {
        let clean = SnapshotWriter::uncompressed().encode(&sample_snapshot()).unwrap();

        let mut bytes = clean.clone();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = SnapshotReader::decode(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::ChecksumMismatch { .. })
        ));

        let mut bytes = clean;
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(SnapshotReader::decode(&bytes).is_err());
    }

    #[test]
    fn test_truncated_file_detected() {
        let bytes = SnapshotWriter::new().encode(&sample_snapshot()).unwrap();
        assert!(SnapshotReader::decode(&bytes[..bytes.len() - 4]).is_err());
        assert!(SnapshotReader::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tmps");
        std::fs::write(&path, b"").unwrap();
        assert!(SnapshotReader::read(&path).is_err());
    }
}
