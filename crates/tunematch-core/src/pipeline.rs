//! PCM to fingerprints
//!
//! The part of the engine shared by ingestion and queries.

use crate::config::FingerprintConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, LandmarkHasher};
use crate::peaks::PeakExtractor;
use crate::transform::SpectrogramBuilder;

/// Validated, reusable fingerprint pipeline
pub struct Fingerprinter {
    config: FingerprintConfig,
    spectrogram: SpectrogramBuilder,
    peaks: PeakExtractor,
    hasher: LandmarkHasher,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            spectrogram: SpectrogramBuilder::from_config(&config)?,
            peaks: PeakExtractor::new(&config),
            hasher: LandmarkHasher::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Fingerprints of a mono buffer, ordered by anchor frame.
    ///
    /// Buffers shorter than one window yield no fingerprints.
    pub fn fingerprint(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Fingerprint>> {
        if sample_rate != self.config.sample_rate {
            return Err(Error::input(format!(
                "sample rate {} Hz does not match the configured {} Hz",
                sample_rate, self.config.sample_rate
            )));
        }
        if samples.is_empty() {
            return Err(Error::input("sample buffer is empty"));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(Error::input(format!("non-finite sample at index {}", index)));
        }

        let spectrogram = self.spectrogram.build(samples, sample_rate);
        if spectrogram.is_empty() {
            log::warn!(
                "{} samples is shorter than one {}-sample window, no fingerprints",
                samples.len(),
                self.config.window_size
            );
            return Ok(Vec::new());
        }

        let field = self.peaks.extract(&spectrogram);
        let fingerprints = self.hasher.hash_all(field.iter());

        log::debug!(
            "{} frames -> {} peaks -> {} fingerprints",
            spectrogram.num_frames,
            field.iter().count(),
            fingerprints.len()
        );

        Ok(fingerprints)
    }
}

/// Fingerprint a buffer in one call
pub fn generate_fingerprints(
    samples: &[f32],
    sample_rate: u32,
    config: &FingerprintConfig,
) -> Result<Vec<Fingerprint>> {
    Fingerprinter::new(config.clone())?.fingerprint(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdMode;
    use std::f32::consts::PI;

    fn chirps(sample_rate: u32, seconds: f32) -> Vec<f32> {
        let len = (sample_rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let step = (t * 10.0) as u32;
                let freq = 300.0 + ((step * 389) % 2500) as f32;
                0.5 * (2.0 * PI * freq * t).sin()
            })
            .collect()
    }

    fn config() -> FingerprintConfig {
        FingerprintConfig {
            sample_rate: 8000,
            window_size: 1024,
            hop_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprinting_is_idempotent() {
        let samples = chirps(8000, 3.0);
        let fp = Fingerprinter::new(config()).unwrap();
        let first = fp.fingerprint(&samples, 8000).unwrap();
        let second = fp.fingerprint(&samples, 8000).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].offset <= w[1].offset));
    }

    #[test]
    fn test_decaying_mode_produces_fingerprints() {
        let samples = chirps(8000, 3.0);
        let config = FingerprintConfig {
            threshold_mode: ThresholdMode::Decaying { decay: 0.9, ratio: 1.0 },
            ..config()
        };
        assert!(!generate_fingerprints(&samples, 8000, &config).unwrap().is_empty());
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let fp = Fingerprinter::new(config()).unwrap();
        assert!(matches!(
            fp.fingerprint(&chirps(16000, 1.0), 16000),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn test_bad_buffers_rejected() {
        let fp = Fingerprinter::new(config()).unwrap();
        assert!(matches!(fp.fingerprint(&[], 8000), Err(Error::Input(_))));

        let mut samples = chirps(8000, 1.0);
        samples[100] = f32::NAN;
        assert!(matches!(fp.fingerprint(&samples, 8000), Err(Error::Input(_))));
    }

    #[test]
    fn test_short_buffer_yields_nothing() {
        let fp = Fingerprinter::new(config()).unwrap();
        assert!(fp.fingerprint(&[0.25; 500], 8000).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = FingerprintConfig {
            hop_size: 0,
            ..config()
        };
        assert!(matches!(Fingerprinter::new(bad), Err(Error::Config(_))));
    }
}
