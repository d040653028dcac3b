//! Configuration parameters for fingerprinting and matching

use crate::error::{Error, Result};
use crate::fingerprint::{FREQ_BITS, TIME_BITS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the peak extractor decides that a cell is loud enough
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Fixed floor: `magnitude > min_magnitude`
    Absolute,
    /// Per-bin envelope decaying by `decay` each frame; a cell must exceed
    /// `ratio` times the decayed envelope of the previous frames
    Decaying { decay: f32, ratio: f32 },
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Absolute
    }
}

/// Fingerprint pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    // Audio
    pub sample_rate: u32,

    // Spectrogram
    pub window_size: usize,
    pub hop_size: usize,

    // Peak extraction
    pub neighborhood_time: usize,
    pub neighborhood_freq: usize,
    pub min_magnitude: f32,
    pub threshold_mode: ThresholdMode,

    // Landmark hashing
    pub fan_out: usize,
    pub max_time_delta: u32,
    pub max_freq_delta: u32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,

            window_size: 4096,
            hop_size: 2048,

            neighborhood_time: 15,
            neighborhood_freq: 31,
            min_magnitude: 1e-3,
            threshold_mode: ThresholdMode::Absolute,

            fan_out: 15,
            max_time_delta: 200,
            max_freq_delta: 256,
        }
    }
}

impl FingerprintConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::config("sample_rate must be > 0"));
        }
        if self.window_size < 2 || !self.window_size.is_power_of_two() {
            return Err(Error::config(format!(
                "window_size must be a power of two >= 2, got {}",
                self.window_size
            )));
        }
        if self.window_size / 2 > 1 << FREQ_BITS {
            return Err(Error::config(format!(
                "window_size {} yields more bins than the {}-bit hash field holds",
                self.window_size, FREQ_BITS
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(Error::config(format!(
                "hop_size must be in 1..={}, got {}",
                self.window_size, self.hop_size
            )));
        }
        if self.neighborhood_time == 0 || self.neighborhood_freq == 0 {
            return Err(Error::config("peak neighborhood must be at least 1x1"));
        }
        // Centred windows only have odd sizes
        if self.neighborhood_time % 2 == 0 || self.neighborhood_freq % 2 == 0 {
            return Err(Error::config(format!(
                "peak neighborhood must be odd in both directions, got {}x{}",
                self.neighborhood_time, self.neighborhood_freq
            )));
        }
        if !self.min_magnitude.is_finite() || self.min_magnitude < 0.0 {
            return Err(Error::config("min_magnitude must be a finite value >= 0"));
        }
        if let ThresholdMode::Decaying { decay, ratio } = self.threshold_mode {
            if !(decay > 0.0 && decay < 1.0) {
                return Err(Error::config(format!("decay must be in (0, 1), got {}", decay)));
            }
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(Error::config(format!("ratio must be > 0, got {}", ratio)));
            }
        }
        if self.fan_out == 0 {
            return Err(Error::config("fan_out must be > 0"));
        }
        if self.max_time_delta == 0 || self.max_time_delta >= 1 << TIME_BITS {
            return Err(Error::config(format!(
                "max_time_delta must be in 1..{}, got {}",
                1u32 << TIME_BITS,
                self.max_time_delta
            )));
        }
        Ok(())
    }

    /// Duration of one spectrogram hop in seconds
    pub fn frame_duration_s(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }
}

/// Query-side matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum normalised vote score for a positive identification
    pub match_threshold: f64,
    /// Cap on query fingerprints considered, 0 = unlimited
    pub fingerprint_limit: usize,
    /// Upper bound on any single store call
    pub store_timeout_ms: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.2,
            fingerprint_limit: 0,
            store_timeout_ms: 10_000,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(Error::config(format!(
                "match_threshold must be in [0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.store_timeout_ms == 0 {
            return Err(Error::config("store_timeout_ms must be > 0"));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        FingerprintConfig::default().validate().unwrap();
        MatchingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_hop_larger_than_window_rejected() {
        let config = FingerprintConfig {
            hop_size: 8192,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_window_not_power_of_two_rejected() {
        let config = FingerprintConfig {
            window_size: 3000,
            hop_size: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_even_neighborhood_rejected() {
        for (nt, nf) in [(14, 31), (15, 30)] {
            let config = FingerprintConfig {
                neighborhood_time: nt,
                neighborhood_freq: nf,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_hop_need_not_be_power_of_two() {
        let config = FingerprintConfig {
            hop_size: 1000,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_time_delta_must_fit_hash() {
        let config = FingerprintConfig {
            max_time_delta: 1 << 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decaying_threshold_bounds() {
        let mut config = FingerprintConfig {
            threshold_mode: ThresholdMode::Decaying { decay: 0.9, ratio: 1.0 },
            ..Default::default()
        };
        config.validate().unwrap();

        config.threshold_mode = ThresholdMode::Decaying { decay: 1.0, ratio: 1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_match_threshold_range() {
        let mut config = MatchingConfig::default();
        config.match_threshold = 1.0;
        config.validate().unwrap();
        config.match_threshold = 1.01;
        assert!(config.validate().is_err());
        config.match_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_duration() {
        let config = FingerprintConfig::default();
        approx::assert_relative_eq!(config.frame_duration_s(), 2048.0 / 44100.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FingerprintConfig = toml::from_str(
            r#"
            hop_size = 1024
            [threshold_mode]
            mode = "decaying"
            decay = 0.95
            ratio = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.hop_size, 1024);
        assert_eq!(config.window_size, 4096);
        assert_eq!(
            config.threshold_mode,
            ThresholdMode::Decaying { decay: 0.95, ratio: 1.5 }
        );
    }
}
