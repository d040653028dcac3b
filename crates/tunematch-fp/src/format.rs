//! Snapshot file structures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes for snapshot files: "TMPS"
pub const MAGIC: [u8; 4] = [0x54, 0x4D, 0x50, 0x53];

/// Current format version
pub const VERSION: u16 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 40;

/// Header bytes covered by the checksum (everything before it)
pub const CHECKSUMMED_HEADER: usize = 32;

/// Size of one encoded posting record
pub const RECORD_SIZE: usize = 16;

const FLAG_COMPRESSED: u16 = 0x1;

/// Structural problems found while decoding a snapshot
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid snapshot: magic bytes mismatch")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("snapshot truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("checksum mismatch: header {expected:#018x}, payload {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
    #[error("posting {index} references unknown track {track}")]
    UnknownTrack { index: usize, track: u32 },
    #[error("header declares {declared} {what}, payload holds {actual}")]
    CountMismatch {
        what: &'static str,
        declared: u64,
        actual: u64,
    },
}

/// File header (40 bytes, little-endian)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Bit 0: payload is zstd-compressed
    pub flags: u16,
    pub track_count: u32,
    pub reserved: u32,
    pub posting_count: u64,
    /// Size of the payload as stored (after compression)
    pub payload_size: u64,
    /// CRC-64/ECMA-182 of header bytes 0..32 followed by the stored payload
    pub checksum: u64,
}

impl SnapshotHeader {
    pub fn new(track_count: u32, posting_count: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            track_count,
            reserved: 0,
            posting_count,
            payload_size: 0,
            checksum: 0,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & FLAG_COMPRESSED) != 0
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        if compressed {
            self.flags |= FLAG_COMPRESSED;
        } else {
            self.flags &= !FLAG_COMPRESSED;
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.track_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out[16..24].copy_from_slice(&self.posting_count.to_le_bytes());
        out[24..32].copy_from_slice(&self.payload_size.to_le_bytes());
        out[32..40].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(FormatError::BadMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        Ok(Self {
            magic,
            version,
            flags: u16::from_le_bytes([bytes[6], bytes[7]]),
            track_count: u32::from_le_bytes(le_array(&bytes[8..12])),
            reserved: u32::from_le_bytes(le_array(&bytes[12..16])),
            posting_count: u64::from_le_bytes(le_array(&bytes[16..24])),
            payload_size: u64::from_le_bytes(le_array(&bytes[24..32])),
            checksum: u64::from_le_bytes(le_array(&bytes[32..40])),
        })
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// One stored posting. `track` indexes into [`Snapshot::tracks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub hash: u64,
    pub track: u32,
    pub offset: u32,
}

/// Complete index snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Interned track identifiers
    pub tracks: Vec<String>,
    /// Postings in insertion order
    pub postings: Vec<PostingRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every posting references a known track
    pub fn validate(&self) -> Result<(), FormatError> {
        let track_count = self.tracks.len() as u32;
        for (index, record) in self.postings.iter().enumerate() {
            if record.track >= track_count {
                return Err(FormatError::UnknownTrack {
                    index,
                    track: record.track,
                });
            }
        }
        Ok(())
    }

    /// Encode the uncompressed payload: track table, then records
    pub(crate) fn encode_payload(&self) -> Vec<u8> {
        let table_size: usize = self.tracks.iter().map(|t| 4 + t.len()).sum();
        let mut out = Vec::with_capacity(table_size + self.postings.len() * RECORD_SIZE);

        for track in &self.tracks {
            out.extend_from_slice(&(track.len() as u32).to_le_bytes());
            out.extend_from_slice(track.as_bytes());
        }
        for record in &self.postings {
            out.extend_from_slice(&record.hash.to_le_bytes());
            out.extend_from_slice(&record.track.to_le_bytes());
            out.extend_from_slice(&record.offset.to_le_bytes());
        }
        out
    }

    /// Decode a payload produced by [`Snapshot::encode_payload`]
    pub(crate) fn decode_payload(
        payload: &[u8],
        track_count: u32,
        posting_count: u64,
    ) -> anyhow::Result<Self> {
        let mut cursor = Cursor::new(payload);

        // Every track entry needs at least its 4-byte length prefix
        let mut tracks = Vec::with_capacity((track_count as usize).min(cursor.remaining() / 4));
        for _ in 0..track_count {
            let len = cursor.u32()? as usize;
            let bytes = cursor.take(len)?;
            tracks.push(String::from_utf8(bytes.to_vec())?);
        }

        let remaining = cursor.remaining();
        if remaining % RECORD_SIZE != 0 || (remaining / RECORD_SIZE) as u64 != posting_count {
            return Err(FormatError::CountMismatch {
                what: "postings",
                declared: posting_count,
                actual: (remaining / RECORD_SIZE) as u64,
            }
            .into());
        }

        let mut postings = Vec::with_capacity(posting_count as usize);
        for _ in 0..posting_count {
            postings.push(PostingRecord {
                hash: cursor.u64()?,
                track: cursor.u32()?,
                offset: cursor.u32()?,
            });
        }

        let snapshot = Self { tracks, postings };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < len {
            return Err(FormatError::Truncated {
                needed: self.pos + len,
                available: self.bytes.len(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(le_array(self.take(4)?)))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(le_array(self.take(8)?)))
    }
}
