use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ClipPool, ClipperError, MediaInfo, Result, Segment, Timecode, Timeline};

use super::{mlt, TimelineExporter};

/// A piece of footage available in the project bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSource {
    pub path: PathBuf,
    pub duration: Timecode,
}

/// A clip reference placed on the video track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectClip {
    pub source: PathBuf,
    pub in_point: Timecode,
    pub out_point: Timecode,
    pub position: Timecode,
}

/// The soundtrack, placed at the start of the audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAudio {
    pub source: PathBuf,
    pub length: Timecode,
}

/// Logical content of an editable project: one video track of clip
/// references and one audio track with the soundtrack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub profile: MediaInfo,
    pub sources: Vec<ProjectSource>,
    pub video_track: Vec<ProjectClip>,
    pub audio_track: ProjectAudio,
}

impl ProjectDocument {
    pub fn length(&self) -> Timecode {
        self.video_track
            .iter()
            .map(|clip| clip.position + (clip.out_point - clip.in_point))
            .max()
            .unwrap_or(Timecode::ZERO)
            .max(self.audio_track.length)
    }

    /// Serializes the document as a Shotcut-compatible MLT project.
    pub fn to_mlt(&self) -> Result<String> {
        mlt::write(self)
    }

    /// Reads back a project produced by [`ProjectDocument::to_mlt`].
    pub fn from_mlt(xml: &str) -> Result<Self> {
        mlt::read(xml)
    }

    /// Rebuilds the timeline the document was exported from, resolving each
    /// clip reference against `pool`.
    pub fn to_timeline(&self, pool: &ClipPool) -> Result<Timeline> {
        let segments = self
            .video_track
            .iter()
            .map(|clip| {
                let id = pool.find_by_path(&clip.source).ok_or_else(|| {
                    ClipperError::Project(format!(
                        "{} is not part of the clip pool",
                        clip.source.display()
                    ))
                })?;
                Ok(Segment {
                    clip: id,
                    source: clip.source.clone(),
                    in_start: clip.in_point,
                    in_end: clip.out_point,
                    output_start: clip.position,
                    output_end: clip.position + (clip.out_point - clip.in_point),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Timeline::new(segments, pool)
    }
}

/// Produces [`ProjectDocument`]s for a given soundtrack and clip pool.
#[derive(Debug, Clone)]
pub struct ProjectFileExporter<'a> {
    soundtrack: PathBuf,
    pool: &'a ClipPool,
}

impl<'a> ProjectFileExporter<'a> {
    pub fn new(soundtrack: impl Into<PathBuf>, pool: &'a ClipPool) -> Self {
        Self {
            soundtrack: soundtrack.into(),
            pool,
        }
    }

    pub fn soundtrack(&self) -> &Path {
        &self.soundtrack
    }

    /// The first probed clip decides the project profile.
    fn profile(&self) -> MediaInfo {
        self.pool
            .iter()
            .find_map(|(_, clip)| clip.media().cloned())
            .unwrap_or_default()
    }
}

impl TimelineExporter for ProjectFileExporter<'_> {
    type Document = ProjectDocument;

    fn export(&self, timeline: &Timeline) -> Result<ProjectDocument> {
        let sources = self
            .pool
            .iter()
            .map(|(_, clip)| ProjectSource {
                path: clip.path().to_path_buf(),
                duration: clip.duration(),
            })
            .collect();

        let video_track = timeline
            .iter()
            .map(|segment| ProjectClip {
                source: segment.source.clone(),
                in_point: segment.in_start,
                out_point: segment.in_end,
                position: segment.output_start,
            })
            .collect();

        Ok(ProjectDocument {
            profile: self.profile(),
            sources,
            video_track,
            audio_track: ProjectAudio {
                source: self.soundtrack.clone(),
                length: timeline.span(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schedule, BeatGrid, ScheduleParameters, SeededSequencer, SourceClip};

    fn pool() -> ClipPool {
        ClipPool::new(vec![
            SourceClip::new("/footage/GH010815.MP4", 31.5)
                .unwrap()
                .with_media(MediaInfo {
                    width: 2704,
                    height: 1520,
                    frame_rate_num: 60_000,
                    frame_rate_den: 1_001,
                }),
            SourceClip::new("/footage/with & ampersand.mp4", 12.25).unwrap(),
            SourceClip::new("/footage/GH010817.MP4", 44.0).unwrap(),
        ])
        .unwrap()
    }

    fn timeline(pool: &ClipPool) -> Timeline {
        let beats: Vec<f64> = (0..64).map(|i| 0.12 + i as f64 * 0.4615).collect();
        let grid = BeatGrid::new(beats).unwrap();
        let mut sequencer = SeededSequencer::new("round trip");
        schedule(&grid, pool, &mut sequencer, &ScheduleParameters::new(4, 19.3)).unwrap()
    }

    #[test]
    fn exports_video_and_audio_tracks() {
        let pool = pool();
        let timeline = timeline(&pool);
        let document = ProjectFileExporter::new("/music/song.mp3", &pool)
            .export(&timeline)
            .unwrap();

        assert_eq!(document.profile.width, 2704);
        assert_eq!(document.sources.len(), 3);
        assert_eq!(document.video_track.len(), timeline.len());
        assert_eq!(document.audio_track.source, PathBuf::from("/music/song.mp3"));
        assert_eq!(document.audio_track.length.as_millis(), 19_300);
        assert_eq!(document.length().as_millis(), 19_300);
    }

    #[test]
    fn mlt_round_trip_reconstructs_timeline() {
        let pool = pool();
        let timeline = timeline(&pool);
        let document = ProjectFileExporter::new("/music/song.mp3", &pool)
            .export(&timeline)
            .unwrap();

        let xml = document.to_mlt().unwrap();
        let parsed = ProjectDocument::from_mlt(&xml).unwrap();

        assert_eq!(parsed, document);
        assert_eq!(parsed.to_timeline(&pool).unwrap(), timeline);
    }

    #[test]
    fn unknown_sources_are_rejected() {
        let pool = pool();
        let timeline = timeline(&pool);
        let document = ProjectFileExporter::new("/music/song.mp3", &pool)
            .export(&timeline)
            .unwrap();

        let other = ClipPool::from_durations(&[("/elsewhere.mp4", 60.0)]).unwrap();
        assert!(matches!(
            document.to_timeline(&other),
            Err(ClipperError::Project(_))
        ));
    }
}
