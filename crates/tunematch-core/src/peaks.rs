//! Peak extraction using 2D max filtering
//!
//! A cell is a peak when it is the strict maximum of its rectangular
//! neighborhood and clears the loudness threshold.

use crate::config::{FingerprintConfig, ThresholdMode};
use crate::transform::Spectrogram;
use serde::{Deserialize, Serialize};

/// A local maximum in the spectrogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Time index (frame number)
    pub frame: u32,
    /// Frequency bin index
    pub bin: u32,
    /// Magnitude value
    pub magnitude: f32,
}

impl Peak {
    pub fn new(frame: u32, bin: u32, magnitude: f32) -> Self {
        Self {
            frame,
            bin,
            magnitude,
        }
    }
}

/// Peak extractor
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    neighborhood_time: usize,
    neighborhood_freq: usize,
    min_magnitude: f32,
    mode: ThresholdMode,
}

impl PeakExtractor {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self::with_params(
            config.neighborhood_time,
            config.neighborhood_freq,
            config.min_magnitude,
            config.threshold_mode,
        )
    }

    /// Neighborhood sizes are centred on the cell, so an even size
    /// covers the next odd size.
    pub fn with_params(
        neighborhood_time: usize,
        neighborhood_freq: usize,
        min_magnitude: f32,
        mode: ThresholdMode,
    ) -> Self {
        Self {
            neighborhood_time: neighborhood_time.max(1),
            neighborhood_freq: neighborhood_freq.max(1),
            min_magnitude,
            mode,
        }
    }

    /// Prepare the filtered grids for `spectrogram`. Peaks are produced
    /// lazily by [`PeakField::iter`].
    pub fn extract<'a>(&self, spectrogram: &'a Spectrogram) -> PeakField<'a> {
        let half_time = self.neighborhood_time / 2;
        let half_freq = self.neighborhood_freq / 2;

        let neighborhood_max = apply_2d_max_filter(spectrogram, half_time, half_freq);
        let thresholds = match self.mode {
            ThresholdMode::Absolute => None,
            ThresholdMode::Decaying { decay, ratio } => Some(decaying_thresholds(
                spectrogram,
                self.min_magnitude,
                decay,
                ratio,
            )),
        };

        PeakField {
            spectrogram,
            neighborhood_max,
            thresholds,
            min_magnitude: self.min_magnitude,
            half_time,
            half_freq,
        }
    }
}

/// Filtered view of a spectrogram from which peaks can be iterated any
/// number of times.
#[derive(Debug, Clone)]
pub struct PeakField<'a> {
    spectrogram: &'a Spectrogram,
    neighborhood_max: Vec<Vec<f32>>,
    thresholds: Option<Vec<Vec<f32>>>,
    min_magnitude: f32,
    half_time: usize,
    half_freq: usize,
}

impl<'a> PeakField<'a> {
    /// Peaks ordered by frame, then bin
    pub fn iter(&self) -> Peaks<'_> {
        Peaks {
            field: self,
            frame: 0,
            bin: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<Peak> {
        self.iter().collect()
    }

    fn threshold(&self, t: usize, f: usize) -> f32 {
        match &self.thresholds {
            Some(grid) => grid[t][f],
            None => self.min_magnitude,
        }
    }

    fn is_peak(&self, t: usize, f: usize) -> bool {
        let magnitudes = &self.spectrogram.magnitudes;
        let value = magnitudes[t][f];

        if !(value > self.threshold(t, f)) || value != self.neighborhood_max[t][f] {
            return false;
        }

        // Equal to the neighborhood max; reject ties so the maximum is strict
        let t_start = t.saturating_sub(self.half_time);
        let t_end = (t + self.half_time + 1).min(self.spectrogram.num_frames);
        let f_start = f.saturating_sub(self.half_freq);
        let f_end = (f + self.half_freq + 1).min(self.spectrogram.num_bins);

        for ti in t_start..t_end {
            for fi in f_start..f_end {
                if (ti, fi) != (t, f) && magnitudes[ti][fi] >= value {
                    return false;
                }
            }
        }
        true
    }
}

/// Lazy peak iterator; clone it to restart from the same position
#[derive(Debug, Clone)]
pub struct Peaks<'f> {
    field: &'f PeakField<'f>,
    frame: usize,
    bin: usize,
}

impl<'f> Iterator for Peaks<'f> {
    type Item = Peak;

    fn next(&mut self) -> Option<Peak> {
        let num_frames = self.field.spectrogram.num_frames;
        let num_bins = self.field.spectrogram.num_bins;

        while self.frame < num_frames {
            while self.bin < num_bins {
                let (t, f) = (self.frame, self.bin);
                self.bin += 1;
                if self.field.is_peak(t, f) {
                    return Some(Peak::new(
                        t as u32,
                        f as u32,
                        self.field.spectrogram.magnitudes[t][f],
                    ));
                }
            }
            self.frame += 1;
            self.bin = 0;
        }
        None
    }
}

/// Apply 2D max filter (frequency then time)
fn apply_2d_max_filter(spectrogram: &Spectrogram, half_time: usize, half_freq: usize) -> Vec<Vec<f32>> {
    let num_frames = spectrogram.num_frames;
    let num_bins = spectrogram.num_bins;

    // First, filter in frequency dimension
    let mut freq_filtered = vec![vec![0.0; num_bins]; num_frames];

    for t in 0..num_frames {
        for f in 0..num_bins {
            let f_start = f.saturating_sub(half_freq);
            let f_end = (f + half_freq + 1).min(num_bins);

            freq_filtered[t][f] = spectrogram.magnitudes[t][f_start..f_end]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
        }
    }

    // Then, filter in time dimension
    let mut time_filtered = vec![vec![0.0; num_bins]; num_frames];

    for t in 0..num_frames {
        let t_start = t.saturating_sub(half_time);
        let t_end = (t + half_time + 1).min(num_frames);

        for f in 0..num_bins {
            time_filtered[t][f] = (t_start..t_end)
                .map(|ti| freq_filtered[ti][f])
                .fold(f32::NEG_INFINITY, f32::max);
        }
    }

    time_filtered
}

/// Per-cell thresholds from a per-bin envelope that decays over time.
/// The threshold for frame `t` only depends on frames before `t`.
fn decaying_thresholds(
    spectrogram: &Spectrogram,
    floor: f32,
    decay: f32,
    ratio: f32,
) -> Vec<Vec<f32>> {
    let mut envelope = vec![0.0f32; spectrogram.num_bins];
    let mut thresholds = Vec::with_capacity(spectrogram.num_frames);

    for frame in &spectrogram.magnitudes {
        let row: Vec<f32> = envelope
            .iter()
            .map(|&env| (ratio * decay * env).max(floor))
            .collect();
        thresholds.push(row);

        for (env, &mag) in envelope.iter_mut().zip(frame) {
            *env = (*env * decay).max(mag);
        }
    }

    thresholds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(magnitudes: Vec<Vec<f32>>) -> Spectrogram {
        let num_frames = magnitudes.len();
        let num_bins = magnitudes.first().map(|f| f.len()).unwrap_or(0);
        Spectrogram {
            magnitudes,
            num_frames,
            num_bins,
            window_size: num_bins * 2,
            hop_size: num_bins,
            sample_rate: 8000,
        }
    }

    fn absolute(nt: usize, nf: usize, floor: f32) -> PeakExtractor {
        PeakExtractor::with_params(nt, nf, floor, ThresholdMode::Absolute)
    }

    #[test]
    fn test_peak_creation() {
        let peak = Peak::new(100, 50, 0.8);
        assert_eq!(peak.frame, 100);
        assert_eq!(peak.bin, 50);
        assert!((peak.magnitude - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_single_maximum() {
        let mut m = vec![vec![0.1; 8]; 8];
        m[3][4] = 1.0;
        let spec = grid(m);
        let peaks = absolute(3, 3, 0.05).extract(&spec).to_vec();
        assert_eq!(peaks, vec![Peak::new(3, 4, 1.0)]);
    }

    #[test]
    fn test_ties_are_not_strict_maxima() {
        let mut m = vec![vec![0.0; 6]; 6];
        m[2][2] = 0.5;
        m[2][3] = 0.5;
        let spec = grid(m);
        assert!(absolute(3, 3, 0.01).extract(&spec).to_vec().is_empty());
    }

    #[test]
    fn test_floor_filters_quiet_cells() {
        let mut m = vec![vec![0.0; 10]; 10];
        m[1][1] = 0.002;
        m[7][7] = 0.5;
        let spec = grid(m);
        let peaks = absolute(3, 3, 0.01).extract(&spec).to_vec();
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].frame, peaks[0].bin), (7, 7));
    }

    #[test]
    fn test_neighborhood_limits_density() {
        // Two maxima 2 bins apart: both survive a 3-wide filter, only the
        // larger survives a 5-wide one
        let mut m = vec![vec![0.0; 12]; 3];
        m[1][4] = 0.6;
        m[1][6] = 0.9;
        let spec = grid(m);
        assert_eq!(absolute(1, 3, 0.01).extract(&spec).to_vec().len(), 2);
        let wide = absolute(1, 5, 0.01).extract(&spec).to_vec();
        assert_eq!(wide, vec![Peak::new(1, 6, 0.9)]);
        assert_eq!(absolute(1, 4, 0.01).extract(&spec).to_vec(), wide);
    }

    #[test]
    fn test_order_and_restart() {
        let mut m = vec![vec![0.0; 16]; 16];
        m[10][2] = 0.7;
        m[2][12] = 0.4;
        m[2][1] = 0.3;
        m[10][14] = 0.8;
        let spec = grid(m);
        let field = absolute(3, 3, 0.01).extract(&spec);

        let keys: Vec<(u32, u32)> = field.iter().map(|p| (p.frame, p.bin)).collect();
        assert_eq!(keys, vec![(2, 1), (2, 12), (10, 2), (10, 14)]);

        let mut iter = field.iter();
        iter.next();
        let resumed = iter.clone();
        assert_eq!(iter.count(), 3);
        assert_eq!(resumed.count(), 3);
        assert_eq!(field.iter().count(), 4);
    }

    #[test]
    fn test_empty_spectrogram() {
        let spec = grid(Vec::new());
        assert_eq!(absolute(3, 3, 0.0).extract(&spec).iter().count(), 0);
    }

    #[test]
    fn test_decaying_threshold_suppresses_after_transient() {
        // Bin 2 is loud at frame 0, then a quieter local maximum at frame 3
        let mut m = vec![vec![0.0; 8]; 12];
        m[0][2] = 1.0;
        m[3][2] = 0.5;
        // Long after the transient a quiet peak passes
        m[11][2] = 0.5;
        let spec = grid(m);

        let decaying = PeakExtractor::with_params(
            1,
            3,
            0.01,
            ThresholdMode::Decaying { decay: 0.8, ratio: 1.0 },
        );
        let peaks: Vec<u32> = decaying.extract(&spec).iter().map(|p| p.frame).collect();
        // frame 3 threshold: 0.8^3 = 0.512 > 0.5; frame 11: 0.8^11 ~ 0.086 < 0.5
        assert_eq!(peaks, vec![0, 11]);

        let plain: Vec<u32> = absolute(1, 3, 0.01).extract(&spec).iter().map(|p| p.frame).collect();
        assert_eq!(plain, vec![0, 3, 11]);
    }
}
