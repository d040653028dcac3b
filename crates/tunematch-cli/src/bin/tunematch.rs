//! tunematch - index audio and identify clips
//!
//! Usage:
//!   tunematch recognize <file> [--top N]
//!   tunematch index <file>... [--track-id ID] [--reindex]
//!   tunematch delete <track_id>
//!
//! Store and matching settings come from `--config <toml>` and the
//! TUNEMATCH_* / PG* environment variables. Output is always one JSON
//! object on stdout; failures print `{"error": ...}` and exit with 2.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tunematch_cli::output::{delete_json, error_json, index_json, match_json, matches_json, print_json};
use tunematch_core::audio::decode_audio;
use tunematch_core::{Recognizer, Settings};

#[derive(Parser, Debug)]
#[command(name = "tunematch")]
#[command(about = "Audio fingerprinting: index tracks and identify clips", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, env = "TUNEMATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify an audio clip
    Recognize {
        file: PathBuf,

        /// Report up to N matching tracks instead of the best one
        #[arg(long)]
        top: Option<usize>,
    },

    /// Fingerprint audio files into the store
    Index {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Track identifier (single file only; defaults to the file stem)
        #[arg(long)]
        track_id: Option<String>,

        /// Replace existing postings of the track
        #[arg(long)]
        reindex: bool,
    },

    /// Remove a track from the store
    Delete { track_id: String },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{}", e);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let rendered = e.to_string();
            let message = rendered.lines().next().unwrap_or_default();
            print_json(&serde_json::json!({ "error": message.trim_start_matches("error: ") }));
            eprint!("{}", rendered);
            return ExitCode::from(2);
        }
    };

    // Initialize logger
    let level = if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Off
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(cli) {
        Ok(value) => {
            print_json(&value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{:#}", e);
            print_json(&error_json(&e));
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<Value> {
    let settings = Settings::resolve(cli.config.as_deref())?;
    log::info!("Storage backend: {:?}", settings.storage.backend);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let recognizer = Recognizer::from_settings(&settings).await?;
        match cli.command {
            Command::Recognize { file, top } => recognize(&recognizer, &file, top).await,
            Command::Index {
                files,
                track_id,
                reindex,
            } => index(&recognizer, &files, track_id, reindex).await,
            Command::Delete { track_id } => {
                let removed = recognizer.delete_track(&track_id).await?;
                Ok(delete_json(&track_id, removed))
            }
        }
    })
}

async fn recognize(recognizer: &Recognizer, file: &Path, top: Option<usize>) -> Result<Value> {
    let sample_rate = recognizer.config().sample_rate;
    let audio = decode_audio(file, sample_rate)?;
    log::info!(
        "Query {}: {} samples ({} ms)",
        file.display(),
        audio.samples.len(),
        audio.duration_ms
    );

    match top {
        Some(n) => {
            let results = recognizer.recognize_top(&audio.samples, sample_rate, n).await?;
            Ok(matches_json(&results))
        }
        None => {
            let result = recognizer.recognize(&audio.samples, sample_rate).await?;
            Ok(match_json(&result))
        }
    }
}

fn default_track_id(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive a track id from {}", path.display()))
}

async fn index(
    recognizer: &Recognizer,
    files: &[PathBuf],
    track_id: Option<String>,
    reindex: bool,
) -> Result<Value> {
    if track_id.is_some() && files.len() > 1 {
        anyhow::bail!("--track-id can only be used with a single file");
    }

    let track_ids: Vec<String> = match track_id {
        Some(id) => vec![id],
        None => files
            .iter()
            .map(|f| default_track_id(f))
            .collect::<Result<_>>()?,
    };

    // Decode everything up front so a bad file aborts before any write
    let sample_rate = recognizer.config().sample_rate;
    let decoded: Vec<Vec<f32>> = files
        .par_iter()
        .map(|f| decode_audio(f, sample_rate).map(|audio| audio.samples))
        .collect::<tunematch_core::Result<_>>()?;
    log::info!("Decoded {} files", decoded.len());

    let reports = if reindex {
        let mut reports = Vec::with_capacity(files.len());
        for (id, samples) in track_ids.iter().zip(&decoded) {
            reports.push(recognizer.reindex_track(id, samples, sample_rate).await?);
        }
        reports
    } else {
        let tracks: Vec<(&str, &[f32])> = track_ids
            .iter()
            .map(String::as_str)
            .zip(decoded.iter().map(Vec::as_slice))
            .collect();
        recognizer.index_tracks(&tracks, sample_rate).await?
    };

    Ok(index_json(&reports))
}
