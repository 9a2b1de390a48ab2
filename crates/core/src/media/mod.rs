//! Thin wrappers around the `ffmpeg` and `ffprobe` command line tools.

use std::{
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use tracing::debug;

use crate::{ClipperError, Result};

/// Resolves `tool` on `PATH`.
pub fn check_tool(tool: &'static str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| ClipperError::ToolNotFound(tool))
}

/// Formats a millisecond count as seconds with exactly three decimals.
pub(crate) fn seconds_arg(millis: u64) -> String {
    format!("{}.{:03}", millis / 1_000, millis % 1_000)
}

#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg invocations with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output_args: Vec<String>,
    output: String,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Creates a command writing to `output`. Use `-` for stdout.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_string_lossy().into_owned(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Adds an input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Adds an input file preceded by per-input options.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(self, graph: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(graph)
    }

    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn video_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().into_owned());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());
        args
    }

    /// Runs the command to completion, capturing stdout and stderr.
    pub fn output(&self) -> Result<Output> {
        let ffmpeg = check_tool("ffmpeg")?;
        let args = self.build_args();
        debug!("running ffmpeg {}", args.join(" "));

        let output = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_follow_input_order() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.mp4")
            .input_with_args(["-ss", "1.000"], "b.mp4")
            .video_codec("libx264")
            .video_bitrate("5000k")
            .frame_rate(30);

        let args = cmd.build_args();
        assert_eq!(&args[..4], &["-y", "-v", "error", "-nostdin"]);
        let a = args.iter().position(|arg| arg == "a.mp4").unwrap();
        let ss = args.iter().position(|arg| arg == "-ss").unwrap();
        let b = args.iter().position(|arg| arg == "b.mp4").unwrap();
        assert!(a < ss && ss < b);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(args.windows(2).any(|pair| pair == ["-b:v", "5000k"]));
        assert_eq!(cmd.input_count(), 2);
    }

    #[test]
    fn seconds_are_exact() {
        assert_eq!(seconds_arg(0), "0.000");
        assert_eq!(seconds_arg(1_005), "1.005");
        assert_eq!(seconds_arg(61_230), "61.230");
    }
}
