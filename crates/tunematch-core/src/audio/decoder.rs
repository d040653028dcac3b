//! Audio decoding for multiple formats

use super::{resample_to_target, AudioFormat};
use crate::error::{Error, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded audio data
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u32,
}

impl AudioData {
    fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frames = samples.len() as f64 / channels.max(1) as f64;
        let duration_ms = if sample_rate > 0 {
            (frames / sample_rate as f64 * 1000.0) as u32
        } else {
            0
        };
        Self {
            samples,
            sample_rate,
            channels,
            duration_ms,
        }
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(self.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Decode an audio file to mono at `target_sample_rate`
pub fn decode_audio(path: &Path, target_sample_rate: u32) -> Result<AudioData> {
    if !path.is_file() {
        return Err(Error::input(format!("Audio file not found: {}", path.display())));
    }

    let audio = match AudioFormat::from_path(path) {
        AudioFormat::Wav => decode_wav(path)?,
        _ => decode_with_symphonia(path)?,
    };

    if audio.samples.is_empty() {
        return Err(Error::input(format!("No audio samples in {}", path.display())));
    }

    let mono = audio.to_mono();
    let samples = resample_to_target(&mono, audio.sample_rate, target_sample_rate)?;

    log::debug!(
        "Decoded {}: {} Hz x {} ch, {} ms",
        path.display(),
        audio.sample_rate,
        audio.channels,
        audio.duration_ms
    );

    Ok(AudioData::new(samples, target_sample_rate, 1))
}

/// Decode WAV file
fn decode_wav(path: &Path) -> Result<AudioData> {
    let wav_error = |e: hound::Error| Error::input(format!("{}: {}", path.display(), e));

    let mut reader = hound::WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(wav_error)?
        }
    };

    Ok(AudioData::new(samples, spec.sample_rate, spec.channels))
}

/// Decode any container Symphonia can probe, using its first audio track
fn decode_with_symphonia(path: &Path) -> Result<AudioData> {
    let decode_error = |e: SymphoniaError| Error::input(format!("{}: {}", path.display(), e));

    let file = std::fs::File::open(path)
        .map_err(|e| Error::input(format!("Failed to open {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::input(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0) as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupt packet in {}: {}", path.display(), msg);
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(AudioData::new(samples, sample_rate, channels))
}
