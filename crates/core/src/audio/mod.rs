use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{media::FfmpegCommand, BeatGrid, ClipperError, Result};

/// A soundtrack decoded to mono 32-bit float PCM.
#[derive(Debug, Clone)]
pub struct Soundtrack {
    path: PathBuf,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl Soundtrack {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decodes `path` through ffmpeg, downmixed to one channel at `sample_rate`.
pub fn decode_mono(path: impl AsRef<Path>, sample_rate: u32) -> Result<Soundtrack> {
    let path = path.as_ref();
    let output = decode_command(path, sample_rate).output()?;
    if !output.status.success() {
        return Err(ClipperError::Decode {
            path: path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let samples = pcm_to_samples(&output.stdout);
    if samples.is_empty() {
        return Err(ClipperError::Decode {
            path: path.to_path_buf(),
            message: "no audio samples were produced".to_string(),
        });
    }

    let soundtrack = Soundtrack {
        path: path.to_path_buf(),
        sample_rate,
        samples,
    };
    info!(
        path = %path.display(),
        seconds = soundtrack.duration_seconds(),
        "decoded soundtrack"
    );
    Ok(soundtrack)
}

fn decode_command(path: &Path, sample_rate: u32) -> FfmpegCommand {
    FfmpegCommand::new("-")
        .input(path)
        .output_args(["-vn", "-ac", "1", "-ar"])
        .output_arg(sample_rate.to_string())
        .format("f32le")
}

fn pcm_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// On-disk beat lists: either a bare array of seconds or an object with a
/// `beats` field, as written by [`save_beats`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BeatsFile {
    List(Vec<f64>),
    Object { beats: Vec<f64> },
}

#[derive(Debug, Serialize)]
struct BeatsReport<'a> {
    tempo_bpm: f64,
    beats: &'a [f64],
}

/// Reads beat timestamps produced by an external analyzer.
pub fn load_beats(path: impl AsRef<Path>) -> Result<BeatGrid> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let timestamps = match serde_json::from_str::<BeatsFile>(&contents)? {
        BeatsFile::List(beats) | BeatsFile::Object { beats } => beats,
    };

    let (grid, _) = BeatGrid::from_unsorted(timestamps)?;
    info!(path = %path.display(), beats = grid.count(), "loaded beat list");
    Ok(grid)
}

/// Serializes `grid` in the object form accepted by [`load_beats`].
pub fn beats_to_json(grid: &BeatGrid) -> Result<String> {
    let report = BeatsReport {
        tempo_bpm: grid.tempo_bpm(),
        beats: grid.as_slice(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn save_beats(path: impl AsRef<Path>, grid: &BeatGrid) -> Result<()> {
    fs::write(path, beats_to_json(grid)?)?;
    Ok(())
}
