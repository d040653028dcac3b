//! Snapshot file writer

use crate::format::{Snapshot, SnapshotHeader, CHECKSUMMED_HEADER};
use anyhow::{Context, Result};
use crc::{Crc, CRC_64_ECMA_182};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Checksum over the header fields that precede it plus the stored payload
pub(crate) fn snapshot_checksum(header: &SnapshotHeader, stored: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&header.to_bytes()[..CHECKSUMMED_HEADER]);
    digest.update(stored);
    digest.finalize()
}

pub struct SnapshotWriter {
    compress: bool,
    level: i32,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self {
            compress: true,
            level: 3,
        }
    }

    /// Store the payload uncompressed
    pub fn uncompressed() -> Self {
        Self {
            compress: false,
            level: 0,
        }
    }

    /// Encode a snapshot into its on-disk byte form
    pub fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        snapshot.validate()?;

        let raw = snapshot.encode_payload();
        let stored = if self.compress {
            zstd::encode_all(&raw[..], self.level).context("Failed to compress snapshot payload")?
        } else {
            raw
        };

        let mut header = SnapshotHeader::new(snapshot.tracks.len() as u32, snapshot.postings.len() as u64);
        header.set_compressed(self.compress);
        header.payload_size = stored.len() as u64;
        header.checksum = snapshot_checksum(&header, &stored);

        let mut out = Vec::with_capacity(header.to_bytes().len() + stored.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&stored);
        Ok(out)
    }

    /// Write a snapshot file
    pub fn write(&self, path: &Path, snapshot: &Snapshot) -> Result<()> {
        let bytes = self.encode(snapshot)?;
        replace_file(path, &bytes)
    }
}

/// Write `bytes` beside `path` and rename into place, so readers never
/// see a half-written file
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = temp_path(path);

    if let Err(e) = write_synced(&tmp_path, bytes) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Failed to move file into place: {}", path.display()));
    }

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
