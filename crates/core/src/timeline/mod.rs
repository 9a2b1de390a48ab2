use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ClipId, ClipPool, ClipperError, Result, Timecode};

/// One source interval mapped onto the output axis at unchanged speed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub clip: ClipId,
    pub source: PathBuf,
    pub in_start: Timecode,
    pub in_end: Timecode,
    pub output_start: Timecode,
    pub output_end: Timecode,
}

impl Segment {
    pub fn duration(&self) -> Timecode {
        self.output_end - self.output_start
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Ordered, output-contiguous list of segments starting at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    segments: Vec<Segment>,
}

impl Timeline {
    /// Validates the segments against `pool` and wraps them.
    pub fn new(segments: Vec<Segment>, pool: &ClipPool) -> Result<Self> {
        let mut cursor = Timecode::ZERO;
        for (index, segment) in segments.iter().enumerate() {
            if segment.output_start != cursor {
                return Err(ClipperError::invalid(format!(
                    "segment {index} starts at {} but the previous one ends at {cursor}",
                    segment.output_start
                )));
            }
            if segment.output_end <= segment.output_start {
                return Err(ClipperError::invalid(format!("segment {index} is empty")));
            }
            if segment.in_end - segment.in_start != segment.duration()
                || segment.in_end <= segment.in_start
            {
                return Err(ClipperError::invalid(format!(
                    "segment {index} changes playback speed"
                )));
            }

            let clip = pool.get(segment.clip).ok_or_else(|| {
                ClipperError::invalid(format!(
                    "segment {index} references unknown clip {}",
                    segment.clip.0
                ))
            })?;
            if segment.in_end > clip.duration() {
                return Err(ClipperError::invalid(format!(
                    "segment {index} reads past the end of {}",
                    clip.path().display()
                )));
            }

            cursor = segment.output_end;
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last segment on the output axis.
    pub fn span(&self) -> Timecode {
        self.segments
            .last()
            .map(|segment| segment.output_end)
            .unwrap_or(Timecode::ZERO)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}
