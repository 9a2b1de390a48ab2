use serde::{Deserialize, Serialize};

use crate::{ClipperError, Result};

/// Immutable, strictly increasing sequence of beat timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BeatGrid {
    beats: Vec<f64>,
}

impl BeatGrid {
    /// Builds a grid from timestamps that are already sorted and unique.
    pub fn new(timestamps: Vec<f64>) -> Result<Self> {
        if timestamps.len() < 2 {
            return Err(ClipperError::invalid(format!(
                "beat grid needs at least 2 timestamps, got {}",
                timestamps.len()
            )));
        }

        if let Some((index, value)) = timestamps
            .iter()
            .enumerate()
            .find(|(_, t)| !t.is_finite() || **t < 0.0)
        {
            return Err(ClipperError::invalid(format!(
                "beat {index} has invalid timestamp {value}"
            )));
        }

        if let Some(index) = timestamps.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(ClipperError::invalid(format!(
                "beat timestamps must be strictly increasing ({} at index {} is followed by {})",
                timestamps[index],
                index,
                timestamps[index + 1]
            )));
        }

        Ok(Self { beats: timestamps })
    }

    /// Sorts and dedupes raw detector output before building the grid.
    ///
    /// Returns the grid together with the number of duplicates that were
    /// dropped so the caller can surface it as a notice.
    pub fn from_unsorted(mut timestamps: Vec<f64>) -> Result<(Self, usize)> {
        timestamps.sort_by(f64::total_cmp);
        let before = timestamps.len();
        timestamps.dedup();
        let removed = before - timestamps.len();
        if removed > 0 {
            tracing::warn!(removed, "dropped duplicate beat timestamps");
        }

        Ok((Self::new(timestamps)?, removed))
    }

    pub fn count(&self) -> usize {
        self.beats.len()
    }

    /// # Panics
    ///
    /// Panics if `index >= count()`.
    pub fn timestamp_at(&self, index: usize) -> f64 {
        self.beats[index]
    }

    /// Distance between beat `index` and beat `index + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `index > count() - 2`.
    pub fn interval_at(&self, index: usize) -> f64 {
        self.beats[index + 1] - self.beats[index]
    }

    pub fn intervals(&self) -> impl Iterator<Item = f64> + '_ {
        self.beats.windows(2).map(|pair| pair[1] - pair[0])
    }

    pub fn total_span(&self) -> f64 {
        self.beats[self.beats.len() - 1] - self.beats[0]
    }

    pub fn mean_interval(&self) -> f64 {
        self.total_span() / (self.beats.len() - 1) as f64
    }

    pub fn tempo_bpm(&self) -> f64 {
        60.0 / self.mean_interval()
    }

    /// Returns beat `index`, extrapolating past the end of the grid at the
    /// mean interval so that long targets keep a steady cut period.
    pub fn beat_at_or_extrapolated(&self, index: usize) -> f64 {
        let last = self.beats.len() - 1;
        if index <= last {
            self.beats[index]
        } else {
            self.beats[last] + (index - last) as f64 * self.mean_interval()
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.beats
    }
}

impl TryFrom<Vec<f64>> for BeatGrid {
    type Error = ClipperError;

    fn try_from(value: Vec<f64>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BeatGrid> for Vec<f64> {
    fn from(value: BeatGrid) -> Self {
        value.beats
    }
}
