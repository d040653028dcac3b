//! Landmark hashing
//!
//! Pairs each anchor peak with nearby later peaks and packs the pair into
//! a 64-bit hash tagged with the anchor's frame.

use crate::config::FingerprintConfig;
use crate::peaks::Peak;
use serde::{Deserialize, Serialize};

/// Width of each bin field in the hash
pub const FREQ_BITS: u32 = 16;
/// Width of the frame delta field in the hash
pub const TIME_BITS: u32 = 16;

const FREQ_MASK: u64 = (1 << FREQ_BITS) - 1;
const TIME_MASK: u64 = (1 << TIME_BITS) - 1;

/// One landmark hash and the frame of the anchor peak that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: u64,
    pub offset: u32,
}

impl Fingerprint {
    pub fn new(hash: u64, offset: u32) -> Self {
        Self { hash, offset }
    }
}

/// Pack `(anchor_bin, target_bin, frame_delta)` into a hash.
///
/// Layout: anchor bin in bits 32..48, target bin in bits 16..32, frame
/// delta in bits 0..16. The top 16 bits stay zero so the value also fits a
/// signed 64-bit column.
pub fn encode_hash(anchor_bin: u32, target_bin: u32, frame_delta: u32) -> u64 {
    ((anchor_bin as u64 & FREQ_MASK) << (FREQ_BITS + TIME_BITS))
        | ((target_bin as u64 & FREQ_MASK) << TIME_BITS)
        | (frame_delta as u64 & TIME_MASK)
}

/// Inverse of [`encode_hash`]
pub fn decode_hash(hash: u64) -> (u32, u32, u32) {
    (
        ((hash >> (FREQ_BITS + TIME_BITS)) & FREQ_MASK) as u32,
        ((hash >> TIME_BITS) & FREQ_MASK) as u32,
        (hash & TIME_MASK) as u32,
    )
}

/// Landmark pair generator
#[derive(Debug, Clone)]
pub struct LandmarkHasher {
    fan_out: usize,
    max_time_delta: u32,
    max_freq_delta: u32,
}

impl LandmarkHasher {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self::with_params(config.fan_out, config.max_time_delta, config.max_freq_delta)
    }

    pub fn with_params(fan_out: usize, max_time_delta: u32, max_freq_delta: u32) -> Self {
        Self {
            fan_out,
            // Deltas beyond the field width would alias
            max_time_delta: max_time_delta.min(TIME_MASK as u32),
            max_freq_delta,
        }
    }

    /// Hash every anchor against up to `fan_out` targets.
    ///
    /// Targets must lie `1..=max_time_delta` frames after the anchor and
    /// within `max_freq_delta` bins. When more qualify, the closest in time
    /// win, then the closest in frequency, then the lower bin. Output is
    /// ordered by anchor, then by that preference.
    pub fn hash_all<I>(&self, peaks: I) -> Vec<Fingerprint>
    where
        I: IntoIterator<Item = Peak>,
    {
        if self.fan_out == 0 {
            return Vec::new();
        }

        let mut peaks: Vec<Peak> = peaks.into_iter().collect();
        if !peaks.windows(2).all(|w| (w[0].frame, w[0].bin) <= (w[1].frame, w[1].bin)) {
            peaks.sort_by_key(|p| (p.frame, p.bin));
        }

        let mut fingerprints = Vec::with_capacity(peaks.len() * self.fan_out);
        let mut targets: Vec<(u32, u32, u32)> = Vec::new();

        for (i, anchor) in peaks.iter().enumerate() {
            targets.clear();

            for target in &peaks[i + 1..] {
                let dt = target.frame - anchor.frame;
                if dt > self.max_time_delta {
                    break;
                }
                // Same-frame peaks carry no timing information
                if dt == 0 {
                    continue;
                }
                let df = target.bin.abs_diff(anchor.bin);
                if df <= self.max_freq_delta {
                    targets.push((dt, df, target.bin));
                }
            }

            if targets.len() > self.fan_out {
                targets.select_nth_unstable(self.fan_out - 1);
                targets.truncate(self.fan_out);
            }
            targets.sort_unstable();

            fingerprints.extend(targets.iter().map(|&(dt, _, target_bin)| {
                Fingerprint::new(encode_hash(anchor.bin, target_bin, dt), anchor.frame)
            }));
        }

        log::trace!(
            "Hashed {} peaks into {} fingerprints",
            peaks.len(),
            fingerprints.len()
        );

        fingerprints
    }
}
