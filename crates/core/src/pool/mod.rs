use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{ClipperError, Result, Timecode};

/// Index of a clip inside its [`ClipPool`]. Stable for the lifetime of the
/// pool because pools are never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(pub usize);

/// Stream properties reported by the prober. Only the project exporter looks at
/// these; the scheduler cares about durations alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate_num: 30_000,
            frame_rate_den: 1_001,
        }
    }
}

impl MediaInfo {
    pub fn fps(&self) -> f64 {
        self.frame_rate_num as f64 / self.frame_rate_den.max(1) as f64
    }
}

/// A probed piece of footage.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceClip {
    path: PathBuf,
    duration: Timecode,
    in_start: Timecode,
    in_end: Timecode,
    media: Option<MediaInfo>,
}

impl SourceClip {
    /// Describes a clip whose whole length is usable.
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64) -> Result<Self> {
        let path = path.into();
        let duration = clip_duration(&path, duration_secs)?;
        Ok(Self {
            path,
            duration,
            in_start: Timecode::ZERO,
            in_end: duration,
            media: None,
        })
    }

    /// Restricts the usable part of the clip to `[start_secs, end_secs)`.
    pub fn with_usable_range(mut self, start_secs: f64, end_secs: f64) -> Result<Self> {
        let start = Timecode::from_secs_f64(start_secs);
        let end = Timecode::from_secs_f64(end_secs).min(self.duration);
        if start_secs < 0.0 || start >= end {
            return Err(ClipperError::invalid(format!(
                "usable range [{start_secs}, {end_secs}) of {} is empty or outside its {} s duration",
                self.path.display(),
                self.duration.as_secs_f64()
            )));
        }
        self.in_start = start;
        self.in_end = end;
        Ok(self)
    }

    pub fn with_media(mut self, media: MediaInfo) -> Self {
        self.media = Some(media);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration(&self) -> Timecode {
        self.duration
    }

    pub fn in_start(&self) -> Timecode {
        self.in_start
    }

    pub fn in_end(&self) -> Timecode {
        self.in_end
    }

    pub fn usable_duration(&self) -> Timecode {
        self.in_end - self.in_start
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }
}

fn clip_duration(path: &Path, duration_secs: f64) -> Result<Timecode> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(ClipperError::invalid(format!(
            "clip {} has non-positive duration {duration_secs}",
            path.display()
        )));
    }

    // Floor so a segment never reaches past the real end of the media.
    let duration = Timecode::from_millis((duration_secs * 1_000.0).floor() as u64);
    if duration.is_zero() {
        return Err(ClipperError::invalid(format!(
            "clip {} is shorter than one millisecond",
            path.display()
        )));
    }
    Ok(duration)
}

/// Ordered catalogue of candidate footage, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipPool {
    clips: Vec<SourceClip>,
}

impl ClipPool {
    pub fn new(clips: Vec<SourceClip>) -> Result<Self> {
        if let Some(clip) = clips.iter().find(|clip| clip.usable_duration().is_zero()) {
            return Err(ClipperError::invalid(format!(
                "clip {} has an empty usable range",
                clip.path.display()
            )));
        }

        // Paths identify clips in exported projects, so each may appear once.
        let duplicate = {
            let mut seen = HashSet::with_capacity(clips.len());
            clips
                .iter()
                .find(|clip| !seen.insert(clip.path.as_path()))
                .map(|clip| clip.path.display().to_string())
        };
        if let Some(path) = duplicate {
            return Err(ClipperError::invalid(format!(
                "clip {path} is listed more than once"
            )));
        }
        Ok(Self { clips })
    }

    /// Convenience constructor for `(path, seconds)` pairs.
    pub fn from_durations<P: AsRef<Path>>(entries: &[(P, f64)]) -> Result<Self> {
        let clips = entries
            .iter()
            .map(|(path, secs)| SourceClip::new(path.as_ref(), *secs))
            .collect::<Result<Vec<_>>>()?;
        Self::new(clips)
    }

    pub fn size(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this pool.
    pub fn clip_at(&self, id: ClipId) -> &SourceClip {
        &self.clips[id.0]
    }

    pub fn get(&self, id: ClipId) -> Option<&SourceClip> {
        self.clips.get(id.0)
    }

    pub fn usable_duration(&self, id: ClipId) -> Timecode {
        self.clip_at(id).usable_duration()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClipId, &SourceClip)> {
        self.clips.iter().enumerate().map(|(i, clip)| (ClipId(i), clip))
    }

    pub fn shortest_usable(&self) -> Option<Timecode> {
        self.clips.iter().map(SourceClip::usable_duration).min()
    }

    pub fn longest_usable(&self) -> Option<Timecode> {
        self.clips.iter().map(SourceClip::usable_duration).max()
    }

    /// Finds the clip whose path equals `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<ClipId> {
        self.clips
            .iter()
            .position(|clip| clip.path == path)
            .map(ClipId)
    }
}
