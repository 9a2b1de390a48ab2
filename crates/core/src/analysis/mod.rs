use std::{collections::VecDeque, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{BeatGrid, ClipperError, Result};

const FLUX_HISTORY: usize = 32;
const MIN_FLUX: f32 = 1e-4;

/// Tuning knobs of the onset detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate the soundtrack is resampled to before analysis.
    pub sample_rate: u32,
    pub block_size: usize,
    /// Onsets closer than this many seconds to the previous beat are ignored.
    pub min_beat_interval: f64,
    /// Standard deviations above the recent mean flux an onset has to reach.
    pub sensitivity: f32,
    /// Replace the detected onsets with an evenly spaced grid at the median
    /// beat interval.
    pub steady_grid: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            block_size: 1024,
            min_beat_interval: 0.2,
            sensitivity: 1.5,
            steady_grid: false,
        }
    }
}

/// Summary of the analysis metadata accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub tempo_bpm: Option<f64>,
    pub duration_seconds: Option<f64>,
}

/// Features of a single analysed block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Start of the block in seconds.
    pub time: f64,
    pub rms: f32,
    /// Sum of positive magnitude changes against the previous block.
    pub spectral_flux: f32,
    pub beat_confidence: f32,
}

/// Offline onset detector based on half-wave rectified spectral flux with an
/// adaptive threshold.
///
/// Blocks are fed in order through [`BeatDetector::process_block`];
/// [`BeatDetector::finish`] turns the collected onsets into a [`BeatGrid`].
pub struct BeatDetector {
    config: AnalysisConfig,
    summary: AnalysisSummary,
    frames: Vec<AnalysisFrame>,
    processed_samples: usize,
    previous_spectrum: Vec<f32>,
    flux_history: VecDeque<f32>,
    beats: Vec<f64>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl BeatDetector {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if config.sample_rate == 0 || config.block_size < 2 {
            return Err(ClipperError::invalid(
                "analysis needs a positive sample rate and blocks of at least two samples",
            ));
        }

        Ok(Self {
            summary: AnalysisSummary {
                sample_rate: config.sample_rate,
                ..Default::default()
            },
            config,
            frames: Vec::new(),
            processed_samples: 0,
            previous_spectrum: Vec::new(),
            flux_history: VecDeque::with_capacity(FLUX_HISTORY),
            beats: Vec::new(),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    pub fn frames(&self) -> &[AnalysisFrame] {
        &self.frames
    }

    /// Onset timestamps detected so far, in seconds.
    pub fn beats(&self) -> &[f64] {
        &self.beats
    }

    /// Consumes audio samples and updates the tracked features.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AnalysisFrame> {
        if samples.len() < 2 {
            return Err(ClipperError::invalid(
                "analysis requires blocks with at least two samples",
            ));
        }

        let sample_rate = f64::from(self.config.sample_rate);
        let time = self.processed_samples as f64 / sample_rate;
        let rms = compute_rms(samples);
        let spectral_flux = self.compute_flux(samples)?;
        let beat_confidence = self.update_beats(time, spectral_flux);

        self.processed_samples += samples.len();
        self.summary.duration_seconds = Some(self.processed_samples as f64 / sample_rate);

        let frame = AnalysisFrame {
            time,
            rms,
            spectral_flux,
            beat_confidence,
        };
        self.frames.push(frame.clone());
        Ok(frame)
    }

    /// Runs the detector over a whole decoded soundtrack.
    pub fn process_all(&mut self, samples: &[f32]) -> Result<()> {
        for block in samples.chunks(self.config.block_size) {
            if block.len() < 2 {
                break;
            }
            self.process_block(block)?;
        }
        Ok(())
    }

    /// Builds the beat grid from the onsets seen so far.
    pub fn finish(&self) -> Result<BeatGrid> {
        if self.beats.len() < 2 {
            return Err(ClipperError::invalid(format!(
                "detected {} beat(s); at least two are needed to cut on",
                self.beats.len()
            )));
        }

        let grid = if self.config.steady_grid {
            self.steady_grid()?
        } else {
            BeatGrid::new(self.beats.clone())?
        };

        info!(
            beats = grid.count(),
            tempo_bpm = grid.tempo_bpm(),
            "beat detection finished"
        );
        Ok(grid)
    }

    fn steady_grid(&self) -> Result<BeatGrid> {
        let mut intervals: Vec<f64> = self.beats.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort_by(f64::total_cmp);
        let period = intervals[intervals.len() / 2];
        let end = self.summary.duration_seconds.unwrap_or(0.0);

        let first = self.beats[0];
        let mut timestamps = Vec::new();
        let mut index = 0u32;
        loop {
            let time = first + f64::from(index) * period;
            if time > end && timestamps.len() >= 2 {
                break;
            }
            timestamps.push(time);
            index += 1;
        }
        debug!(period, count = timestamps.len(), "built steady beat grid");
        BeatGrid::new(timestamps)
    }

    fn update_beats(&mut self, time: f64, flux: f32) -> f32 {
        let count = self.flux_history.len() as f32;
        let (mean, std) = if count > 0.0 {
            let mean = self.flux_history.iter().sum::<f32>() / count;
            let variance = self
                .flux_history
                .iter()
                .map(|value| (value - mean).powi(2))
                .sum::<f32>()
                / count;
            (mean, variance.sqrt())
        } else {
            (0.0, 0.0)
        };

        if self.flux_history.len() == FLUX_HISTORY {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);

        let threshold = (mean + self.config.sensitivity * std).max(MIN_FLUX);
        if flux <= threshold {
            return 0.0;
        }

        let confidence = ((flux - threshold) / threshold).clamp(0.0, 1.0);
        let spaced = self
            .beats
            .last()
            .map(|last| time - last >= self.config.min_beat_interval)
            .unwrap_or(true);
        if spaced {
            self.beats.push(time);
            self.update_tempo_estimate();
        }
        confidence
    }

    fn update_tempo_estimate(&mut self) {
        if self.beats.len() < 2 {
            return;
        }

        let span = self.beats[self.beats.len() - 1] - self.beats[0];
        let average_interval = span / (self.beats.len() - 1) as f64;
        if average_interval > 0.0 {
            self.summary.tempo_bpm = Some(60.0 / average_interval);
        }
    }

    fn compute_flux(&mut self, samples: &[f32]) -> Result<f32> {
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| ClipperError::invalid(format!("fft failed: {err}")))?;

        let norm = 1.0 / len as f32;
        let magnitudes: Vec<f32> = fft.spectrum.iter().map(|bin| bin.norm() * norm).collect();

        let flux = if self.previous_spectrum.len() == magnitudes.len() {
            magnitudes
                .iter()
                .zip(&self.previous_spectrum)
                .map(|(current, previous)| (current - previous).max(0.0))
                .sum()
        } else {
            magnitudes.iter().sum()
        };

        self.previous_spectrum = magnitudes;
        Ok(flux)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::new(planner, size));
        if fft.size != size {
            *fft = FftResources::new(planner, size);
        }
        fft
    }
}

/// Runs the detector over already decoded mono samples.
pub fn detect_beats(samples: &[f32], config: &AnalysisConfig) -> Result<BeatGrid> {
    let mut detector = BeatDetector::new(config.clone())?;
    detector.process_all(samples)?;
    detector.finish()
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for BeatDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatDetector")
            .field("config", &self.config)
            .field("summary", &self.summary)
            .field("frames", &self.frames.len())
            .field("processed_samples", &self.processed_samples)
            .field("beats", &self.beats.len())
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8_000;
    const BLOCK: usize = 400;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            sample_rate: RATE,
            block_size: BLOCK,
            ..Default::default()
        }
    }

    /// Silence with a short 1 kHz burst in the middle of the block that
    /// starts at every multiple of `spacing` seconds (except zero).
    fn clicks(spacing: f64, seconds: f64) -> Vec<f32> {
        let total = (seconds * f64::from(RATE)) as usize;
        let step = (spacing * f64::from(RATE)) as usize;
        let mut samples = vec![0.0; total];
        for start in (step..total).step_by(step) {
            for offset in 150..250 {
                if let Some(sample) = samples.get_mut(start + offset) {
                    let t = offset as f32 / RATE as f32;
                    *sample = 0.8 * (2.0 * PI * 1_000.0 * t).sin();
                }
            }
        }
        samples
    }

    #[test]
    fn silence_has_no_features() {
        let mut detector = BeatDetector::new(config()).unwrap();
        let frame = detector.process_block(&[0.0; BLOCK]).unwrap();

        assert_eq!(frame.rms, 0.0);
        assert_eq!(frame.spectral_flux, 0.0);
        assert_eq!(frame.beat_confidence, 0.0);
        assert!(detector.beats().is_empty());
    }

    #[test]
    fn detects_synthetic_clicks() {
        let grid = detect_beats(&clicks(0.5, 5.0), &config()).unwrap();

        let expected: Vec<f64> = (1..10).map(|i| i as f64 * 0.5).collect();
        assert_eq!(grid.count(), expected.len());
        for (found, wanted) in grid.as_slice().iter().zip(&expected) {
            assert!((found - wanted).abs() < 1e-9, "{found} vs {wanted}");
        }
        assert!((grid.tempo_bpm() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn summary_tracks_duration_and_tempo() {
        let mut detector = BeatDetector::new(config()).unwrap();
        detector.process_all(&clicks(0.5, 3.0)).unwrap();

        let summary = detector.summary();
        assert!((summary.duration_seconds.unwrap() - 3.0).abs() < 1e-9);
        assert!((summary.tempo_bpm.unwrap() - 120.0).abs() < 1e-6);
    }

    #[test]
    fn min_interval_suppresses_close_onsets() {
        let config = AnalysisConfig {
            min_beat_interval: 0.6,
            ..config()
        };
        let grid = detect_beats(&clicks(0.5, 5.0), &config).unwrap();

        assert!(grid.intervals().all(|interval| interval >= 0.6));
    }

    #[test]
    fn steady_grid_extends_to_the_end() {
        let config = AnalysisConfig {
            steady_grid: true,
            ..config()
        };
        let grid = detect_beats(&clicks(0.5, 5.0), &config).unwrap();

        assert_eq!(grid.timestamp_at(0), 0.5);
        assert!(grid.intervals().all(|interval| (interval - 0.5).abs() < 1e-9));
        assert!(grid.as_slice().last().copied().unwrap() <= 5.0);
        assert_eq!(grid.count(), 10);
    }

    #[test]
    fn too_few_beats_is_an_error() {
        let result = detect_beats(&[0.0; 4 * BLOCK], &config());
        assert!(matches!(result, Err(ClipperError::InvalidInput(_))));
    }
}
