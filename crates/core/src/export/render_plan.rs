use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ClipperError, RenderSettings, Result, Timecode, Timeline};

use super::TimelineExporter;

/// One cut for the encoder: play `source` from `in_start` to `in_end`,
/// starting at `output_start` in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderEntry {
    pub source: PathBuf,
    pub in_start: Timecode,
    pub in_end: Timecode,
    pub output_start: Timecode,
}

impl RenderEntry {
    pub fn duration(&self) -> Timecode {
        self.in_end - self.in_start
    }
}

/// Everything the media tool needs to cut, concatenate and mux the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPlan {
    pub soundtrack: PathBuf,
    pub output: PathBuf,
    pub length: Timecode,
    pub settings: RenderSettings,
    pub entries: Vec<RenderEntry>,
}

#[derive(Debug, Clone)]
pub struct RenderPlanExporter {
    soundtrack: PathBuf,
    output: PathBuf,
    settings: RenderSettings,
}

impl RenderPlanExporter {
    pub fn new(
        soundtrack: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            soundtrack: soundtrack.into(),
            output: output.into(),
            settings,
        }
    }
}

impl TimelineExporter for RenderPlanExporter {
    type Document = RenderPlan;

    fn export(&self, timeline: &Timeline) -> Result<RenderPlan> {
        if timeline.is_empty() {
            return Err(ClipperError::invalid("cannot render an empty timeline"));
        }

        let entries = timeline
            .iter()
            .map(|segment| RenderEntry {
                source: segment.source.clone(),
                in_start: segment.in_start,
                in_end: segment.in_end,
                output_start: segment.output_start,
            })
            .collect();

        Ok(RenderPlan {
            soundtrack: self.soundtrack.clone(),
            output: self.output.clone(),
            length: timeline.span(),
            settings: self.settings.clone(),
            entries,
        })
    }
}
