use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    AnalysisConfig, ClipTrim, ClipperError, FallbackPolicy, RenderSettings, Result,
    ScheduleParameters, Seed,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipperConfig {
    pub schedule: ScheduleConfig,
    pub render: RenderSettings,
    pub analysis: AnalysisConfig,
    pub trim: ClipTrim,
}

impl ClipperConfig {
    /// Loads a JSON configuration file. Missing sections keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}

/// Configuration specific to the clip scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Beats per cut.
    pub multiplier: u32,
    /// Output length in seconds; the soundtrack length when unset.
    pub target_length: Option<f64>,
    pub seed: Seed,
    pub min_repeat_gap: Option<usize>,
    pub fallback: FallbackPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            multiplier: 1,
            target_length: None,
            seed: Seed::default(),
            min_repeat_gap: None,
            fallback: FallbackPolicy::default(),
        }
    }
}

impl ScheduleConfig {
    /// Resolves the scheduler parameters, never running past the soundtrack.
    pub fn parameters(&self, soundtrack_length: f64) -> Result<ScheduleParameters> {
        if !soundtrack_length.is_finite() || soundtrack_length <= 0.0 {
            return Err(ClipperError::invalid(format!(
                "soundtrack length {soundtrack_length} is not positive"
            )));
        }

        let target = match self.target_length {
            Some(length) if length > soundtrack_length => {
                tracing::warn!(
                    requested = length,
                    available = soundtrack_length,
                    "target length exceeds the soundtrack; clamping"
                );
                soundtrack_length
            }
            Some(length) => length,
            None => soundtrack_length,
        };

        let mut parameters =
            ScheduleParameters::new(self.multiplier, target).with_fallback(self.fallback);
        if let Some(gap) = self.min_repeat_gap {
            parameters = parameters.with_min_repeat_gap(gap);
        }
        Ok(parameters)
    }
}
