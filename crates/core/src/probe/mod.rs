//! Clip probing through `ffprobe`.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{media::check_tool, ClipPool, ClipperError, MediaInfo, Result, SourceClip};

/// What the pool needs to know about a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedMedia {
    /// Duration in seconds.
    pub duration: f64,
    /// Present when the file has a video stream.
    pub media: Option<MediaInfo>,
}

/// Collaborator that reports durations and stream metadata of media files.
pub trait ClipProber {
    fn probe(&self, path: &Path) -> Result<ProbedMedia>;
}

/// Seconds cut from both ends of every clip before scheduling, e.g. to skip
/// camera shake at the start and end of a take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipTrim {
    pub head: f64,
    pub tail: f64,
}

impl ClipTrim {
    pub fn is_empty(&self) -> bool {
        self.head <= 0.0 && self.tail <= 0.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfprobeProber;

impl FfprobeProber {
    pub fn new() -> Self {
        Self
    }
}

impl ClipProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<ProbedMedia> {
        if !path.exists() {
            return Err(ClipperError::probe_failed(path, "file does not exist"));
        }

        let ffprobe = check_tool("ffprobe")?;
        debug!(path = %path.display(), "probing");
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClipperError::probe_failed(
                path,
                format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        parse_ffprobe_output(path, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Interprets `ffprobe -print_format json` output for `path`.
pub fn parse_ffprobe_output(path: &Path, stdout: &[u8]) -> Result<ProbedMedia> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|err| ClipperError::probe_failed(path, format!("unreadable ffprobe output: {err}")))?;

    let video = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));

    let duration = probe
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .or_else(|| video.and_then(|stream| stream.duration.as_deref()))
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .ok_or_else(|| ClipperError::probe_failed(path, "no usable duration reported"))?;

    let media = video.map(|stream| {
        let (frame_rate_num, frame_rate_den) = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
            .unwrap_or((30_000, 1_001));
        let fallback = MediaInfo::default();
        MediaInfo {
            width: stream.width.unwrap_or(fallback.width),
            height: stream.height.unwrap_or(fallback.height),
            frame_rate_num,
            frame_rate_den,
        }
    });

    Ok(ProbedMedia { duration, media })
}

/// Parses ffprobe's `num/den` rates. `0/0` and malformed values yield `None`.
pub fn parse_frame_rate(rate: &str) -> Option<(u32, u32)> {
    let (num, den) = rate.split_once('/')?;
    let num = num.trim().parse::<u32>().ok()?;
    let den = den.trim().parse::<u32>().ok()?;
    (num > 0 && den > 0).then_some((num, den))
}

/// Probes every path and assembles the pool in the given order.
///
/// Files without a video stream are rejected. A path given more than once
/// is only added the first time. A trim that would consume a whole clip is
/// ignored for that clip with a warning.
pub fn build_pool<P: ClipProber + ?Sized>(
    prober: &P,
    paths: &[PathBuf],
    trim: ClipTrim,
) -> Result<ClipPool> {
    let mut clips = Vec::with_capacity(paths.len());
    let mut seen = HashSet::with_capacity(paths.len());
    for path in paths {
        if !seen.insert(path) {
            warn!(path = %path.display(), "clip listed more than once; skipping repeat");
            continue;
        }

        let probed = prober.probe(path)?;
        let media = probed
            .media
            .ok_or_else(|| ClipperError::probe_failed(path, "no video stream found"))?;

        let mut clip = SourceClip::new(path, probed.duration)?.with_media(media);
        if !trim.is_empty() {
            let start = trim.head.max(0.0);
            let end = probed.duration - trim.tail.max(0.0);
            if end - start >= 0.001 {
                clip = clip.with_usable_range(start, end)?;
            } else {
                warn!(
                    path = %path.display(),
                    duration = probed.duration,
                    "clip too short to trim; using it whole"
                );
            }
        }
        debug!(
            path = %path.display(),
            usable = %clip.usable_duration(),
            "added clip to pool"
        );
        clips.push(clip);
    }

    let pool = ClipPool::new(clips)?;
    info!(clips = pool.size(), "clip pool ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::Timecode;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "audio", "duration": "12.000000"},
            {"index": 1, "codec_type": "video", "width": 2704, "height": 1520,
             "r_frame_rate": "60000/1001", "avg_frame_rate": "0/0", "duration": "12.012000"}
        ],
        "format": {"filename": "GH010815.MP4", "duration": "12.012000", "size": "123"}
    }"#;

    struct FakeProber(HashMap<PathBuf, ProbedMedia>);

    impl ClipProber for FakeProber {
        fn probe(&self, path: &Path) -> Result<ProbedMedia> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| ClipperError::probe_failed(path, "unknown"))
        }
    }

    fn video(duration: f64) -> ProbedMedia {
        ProbedMedia {
            duration,
            media: Some(MediaInfo::default()),
        }
    }

    #[test]
    fn parses_video_metadata() {
        let probed = parse_ffprobe_output(Path::new("GH010815.MP4"), SAMPLE.as_bytes()).unwrap();

        assert!((probed.duration - 12.012).abs() < 1e-9);
        let media = probed.media.unwrap();
        assert_eq!((media.width, media.height), (2704, 1520));
        assert_eq!((media.frame_rate_num, media.frame_rate_den), (60_000, 1_001));
    }

    #[test]
    fn audio_only_files_have_no_media() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "201.5"}}"#;
        let probed = parse_ffprobe_output(Path::new("song.mp3"), json).unwrap();

        assert_eq!(probed.duration, 201.5);
        assert!(probed.media.is_none());
    }

    #[test]
    fn missing_duration_is_a_probe_error() {
        let json = br#"{"streams": [], "format": {"duration": "N/A"}}"#;
        assert!(matches!(
            parse_ffprobe_output(Path::new("broken.mp4"), json),
            Err(ClipperError::Probe { .. })
        ));
    }

    #[test]
    fn frame_rates() {
        assert_eq!(parse_frame_rate("30000/1001"), Some((30_000, 1_001)));
        assert_eq!(parse_frame_rate("25/1"), Some((25, 1)));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("fast"), None);
    }

    #[test]
    fn builds_pool_in_order_with_trim() {
        let paths = vec![PathBuf::from("b.mp4"), PathBuf::from("a.mp4")];
        let prober = FakeProber(
            [(paths[0].clone(), video(10.0)), (paths[1].clone(), video(0.5))]
                .into_iter()
                .collect(),
        );

        let pool = build_pool(&prober, &paths, ClipTrim { head: 1.0, tail: 2.0 }).unwrap();
        let clips: Vec<_> = pool.iter().map(|(_, clip)| clip).collect();

        assert_eq!(clips[0].path(), Path::new("b.mp4"));
        assert_eq!(clips[0].in_start(), Timecode::from_millis(1_000));
        assert_eq!(clips[0].in_end(), Timecode::from_millis(8_000));
        assert_eq!(clips[1].usable_duration(), Timecode::from_millis(500));
    }

    #[test]
    fn repeated_paths_join_the_pool_once() {
        let paths = vec![
            PathBuf::from("a.mp4"),
            PathBuf::from("a.mp4"),
            PathBuf::from("b.mp4"),
        ];
        let prober = FakeProber(
            [(paths[0].clone(), video(20.0)), (paths[2].clone(), video(20.0))]
                .into_iter()
                .collect(),
        );

        let pool = build_pool(&prober, &paths, ClipTrim::default()).unwrap();
        let sources: Vec<_> = pool.iter().map(|(_, clip)| clip.path()).collect();
        assert_eq!(sources, [Path::new("a.mp4"), Path::new("b.mp4")]);
    }

    #[test]
    fn rejects_files_without_video() {
        let paths = vec![PathBuf::from("song.mp3")];
        let prober = FakeProber(
            [(
                paths[0].clone(),
                ProbedMedia {
                    duration: 3.0,
                    media: None,
                },
            )]
            .into_iter()
            .collect(),
        );

        assert!(matches!(
            build_pool(&prober, &paths, ClipTrim::default()),
            Err(ClipperError::Probe { .. })
        ));
    }
}
