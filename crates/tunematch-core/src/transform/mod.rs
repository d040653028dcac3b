//! Short-time Fourier transform
//!
//! Hann-windowed FFT magnitudes over overlapping windows of the input.

use crate::config::FingerprintConfig;
use crate::error::{Error, Result};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Spectrogram representation
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// Magnitude values [time_frame][frequency_bin]
    pub magnitudes: Vec<Vec<f32>>,
    /// Number of time frames
    pub num_frames: usize,
    /// Number of frequency bins (`window_size / 2`)
    pub num_bins: usize,
    pub window_size: usize,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl Spectrogram {
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0
    }

    /// Center frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.window_size as f32
    }
}

/// Number of full windows that fit in `sample_count` samples
pub fn frame_count(sample_count: usize, window_size: usize, hop_size: usize) -> usize {
    if sample_count < window_size {
        0
    } else {
        (sample_count - window_size) / hop_size + 1
    }
}

/// Reusable STFT plan for one window/hop geometry
pub struct SpectrogramBuilder {
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    window_sum: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrogramBuilder {
    pub fn new(window_size: usize, hop_size: usize) -> Result<Self> {
        if window_size < 2 || !window_size.is_power_of_two() {
            return Err(Error::config(format!(
                "window_size must be a power of two >= 2, got {}",
                window_size
            )));
        }
        if hop_size == 0 || hop_size > window_size {
            return Err(Error::config(format!(
                "hop_size must be in 1..={}, got {}",
                window_size, hop_size
            )));
        }

        let window = create_hann_window(window_size);
        let window_sum: f32 = window.iter().sum();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);

        Ok(Self {
            window_size,
            hop_size,
            window,
            // A two-point symmetric Hann window is all zeros
            window_sum: if window_sum > 0.0 { window_sum } else { 1.0 },
            fft,
        })
    }

    pub fn from_config(config: &FingerprintConfig) -> Result<Self> {
        Self::new(config.window_size, config.hop_size)
    }

    /// Build the spectrogram. Inputs shorter than one window give zero frames.
    pub fn build(&self, samples: &[f32], sample_rate: u32) -> Spectrogram {
        let num_frames = frame_count(samples.len(), self.window_size, self.hop_size);
        let num_bins = self.window_size / 2;

        let magnitudes: Vec<Vec<f32>> = (0..num_frames)
            .into_par_iter()
            .map(|frame_idx| {
                let start = frame_idx * self.hop_size;
                self.frame_magnitudes(&samples[start..start + self.window_size])
            })
            .collect();

        log::debug!(
            "Spectrogram: {} samples -> {} frames x {} bins",
            samples.len(),
            num_frames,
            num_bins
        );

        Spectrogram {
            magnitudes,
            num_frames,
            num_bins,
            window_size: self.window_size,
            hop_size: self.hop_size,
            sample_rate,
        }
    }

    fn frame_magnitudes(&self, frame: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        buffer[..self.window_size / 2]
            .iter()
            .map(|c| c.norm() / self.window_sum)
            .collect()
    }
}

/// Compute a spectrogram in one call
pub fn compute_transform(
    samples: &[f32],
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
) -> Result<Spectrogram> {
    Ok(SpectrogramBuilder::new(window_size, hop_size)?.build(samples, sample_rate))
}

/// Create Hann window
fn create_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}
