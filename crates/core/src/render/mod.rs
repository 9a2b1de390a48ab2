use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    media::{seconds_arg, FfmpegCommand},
    ClipperError, RenderPlan, Result,
};

/// Frame size every segment is scaled and padded to before concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Encoder options for the final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub fps: u32,
    pub bitrate: String,
    pub video_codec: String,
    pub audio_codec: String,
    /// Seconds of fade-out at the end of the soundtrack.
    pub audio_fadeout: f64,
    /// Rotate the picture by 180 degrees.
    pub flip: bool,
    /// Normalises mixed footage. `None` leaves frames untouched, which only
    /// works when every source shares the same size.
    pub resolution: Option<Resolution>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate: "5000k".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_fadeout: 2.0,
            flip: false,
            resolution: None,
        }
    }
}

/// Render collaborator backed by a single ffmpeg invocation.
#[derive(Debug, Default)]
pub struct FfmpegRenderer;

impl FfmpegRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Translates `plan` into a trim/concat filter graph over deduplicated
    /// inputs, with the soundtrack as the last input.
    pub fn build_command(&self, plan: &RenderPlan) -> Result<FfmpegCommand> {
        if plan.entries.is_empty() {
            return Err(ClipperError::invalid("render plan has no entries"));
        }

        let settings = &plan.settings;
        let mut command = FfmpegCommand::new(&plan.output);
        let mut inputs: HashMap<&PathBuf, usize> = HashMap::new();
        let mut graph = String::new();

        for (index, entry) in plan.entries.iter().enumerate() {
            let input = match inputs.get(&entry.source) {
                Some(input) => *input,
                None => {
                    let input = command.input_count();
                    command = command.input(&entry.source);
                    inputs.insert(&entry.source, input);
                    input
                }
            };

            graph.push_str(&format!(
                "[{input}:v]trim=start={}:end={},setpts=PTS-STARTPTS",
                seconds_arg(entry.in_start.as_millis()),
                seconds_arg(entry.in_end.as_millis()),
            ));
            if let Some(Resolution { width, height }) = settings.resolution {
                graph.push_str(&format!(
                    ",scale={width}:{height}:force_original_aspect_ratio=decrease,\
                     pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
                ));
            }
            graph.push_str(&format!(",fps={}[v{index}];", settings.fps));
        }

        for index in 0..plan.entries.len() {
            graph.push_str(&format!("[v{index}]"));
        }
        graph.push_str(&format!("concat=n={}:v=1:a=0", plan.entries.len()));
        if settings.flip {
            graph.push_str(",hflip,vflip");
        }
        graph.push_str("[v];");

        let audio = command.input_count();
        command = command.input(&plan.soundtrack);
        let length = plan.length.as_millis();
        graph.push_str(&format!(
            "[{audio}:a]atrim=start=0:end={},asetpts=PTS-STARTPTS",
            seconds_arg(length)
        ));
        let fade = (settings.audio_fadeout.max(0.0) * 1_000.0).round() as u64;
        let fade = fade.min(length);
        if fade > 0 {
            graph.push_str(&format!(
                ",afade=t=out:st={}:d={}",
                seconds_arg(length - fade),
                seconds_arg(fade)
            ));
        }
        graph.push_str("[a]");

        Ok(command
            .filter_complex(graph)
            .map("[v]")
            .map("[a]")
            .frame_rate(settings.fps)
            .video_codec(settings.video_codec.clone())
            .video_bitrate(settings.bitrate.clone())
            .audio_codec(settings.audio_codec.clone()))
    }

    /// Runs ffmpeg for `plan`. Failures are reported verbatim, never retried.
    pub fn render(&self, plan: &RenderPlan) -> Result<()> {
        let command = self.build_command(plan)?;
        info!(
            output = %plan.output.display(),
            segments = plan.entries.len(),
            length = %plan.length,
            "rendering video"
        );

        let output = command.output()?;
        if output.status.success() {
            info!(output = %plan.output.display(), "render finished");
            Ok(())
        } else {
            Err(ClipperError::render_failed(
                "ffmpeg exited with non-zero status",
                Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                output.status.code(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RenderEntry, Timecode};

    fn plan(settings: RenderSettings) -> RenderPlan {
        let entry = |source: &str, in_start: u64, in_end: u64, output_start: u64| RenderEntry {
            source: PathBuf::from(source),
            in_start: Timecode::from_millis(in_start),
            in_end: Timecode::from_millis(in_end),
            output_start: Timecode::from_millis(output_start),
        };

        RenderPlan {
            soundtrack: PathBuf::from("song.mp3"),
            output: PathBuf::from("result.mp4"),
            length: Timecode::from_millis(6_000),
            settings,
            entries: vec![
                entry("a.mp4", 1_000, 3_000, 0),
                entry("b.mp4", 500, 2_500, 2_000),
                entry("a.mp4", 7_250, 9_250, 4_000),
            ],
        }
    }

    fn filter_graph(args: &[String]) -> &str {
        let index = args.iter().position(|arg| arg == "-filter_complex").unwrap();
        &args[index + 1]
    }

    #[test]
    fn reuses_inputs_and_appends_soundtrack() {
        let args = FfmpegRenderer::new()
            .build_command(&plan(RenderSettings::default()))
            .unwrap()
            .build_args();

        let inputs: Vec<&str> = args
            .windows(2)
            .filter(|pair| pair[0] == "-i")
            .map(|pair| pair[1].as_str())
            .collect();
        assert_eq!(inputs, vec!["a.mp4", "b.mp4", "song.mp3"]);
        assert_eq!(args.last().map(String::as_str), Some("result.mp4"));
    }

    #[test]
    fn graph_trims_concatenates_and_fades() {
        let args = FfmpegRenderer::new()
            .build_command(&plan(RenderSettings::default()))
            .unwrap()
            .build_args();
        let graph = filter_graph(&args);

        assert!(graph.starts_with("[0:v]trim=start=1.000:end=3.000,setpts=PTS-STARTPTS,fps=30[v0];"));
        assert!(graph.contains("[0:v]trim=start=7.250:end=9.250"));
        assert!(graph.contains("[v0][v1][v2]concat=n=3:v=1:a=0[v];"));
        assert!(graph.ends_with(
            "[2:a]atrim=start=0:end=6.000,asetpts=PTS-STARTPTS,afade=t=out:st=4.000:d=2.000[a]"
        ));
    }

    #[test]
    fn optional_filters_are_applied() {
        let settings = RenderSettings {
            flip: true,
            audio_fadeout: 0.0,
            resolution: Some(Resolution {
                width: 1280,
                height: 720,
            }),
            ..Default::default()
        };
        let args = FfmpegRenderer::new()
            .build_command(&plan(settings))
            .unwrap()
            .build_args();
        let graph = filter_graph(&args);

        assert!(graph.contains("scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(graph.contains("concat=n=3:v=1:a=0,hflip,vflip[v]"));
        assert!(!graph.contains("afade"));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let mut plan = plan(RenderSettings::default());
        plan.entries.clear();
        assert!(FfmpegRenderer::new().build_command(&plan).is_err());
    }
}
