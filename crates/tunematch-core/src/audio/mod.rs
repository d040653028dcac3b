//! Audio decoding and resampling
//!
//! Turns audio files into mono PCM at the canonical sample rate. WAV goes
//! through hound, every other container through Symphonia.

mod decoder;
mod resample;

pub use decoder::{decode_audio, AudioData};
pub use resample::resample_to_target;

use std::path::Path;

/// Container families the decoder distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    Mp4,
    Mkv,
    Unknown,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("wav") | Some("wave") => AudioFormat::Wav,
            Some("mp3") => AudioFormat::Mp3,
            Some("flac") => AudioFormat::Flac,
            Some("ogg") | Some("oga") => AudioFormat::Ogg,
            Some("mp4") | Some("m4a") | Some("aac") => AudioFormat::Mp4,
            Some("mkv") | Some("mka") | Some("webm") => AudioFormat::Mkv,
            _ => AudioFormat::Unknown,
        }
    }
}
