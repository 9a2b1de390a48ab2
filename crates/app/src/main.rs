use std::{fs, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use clipper_core::{
    audio, build_pool, decode_mono, detect_beats, load_beats, schedule, BeatGrid, ClipPool,
    ClipProber, ClipperConfig, FallbackPolicy, FfmpegRenderer, FfprobeProber,
    ProjectFileExporter, RenderPlanExporter, Result, SeededSequencer, Timeline, TimelineExporter,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClipperConfig::load(path)?,
        None => ClipperConfig::default(),
    };

    match cli.command {
        Commands::Render {
            pipeline,
            output,
            bitrate,
            fps,
            flip,
            plan,
        } => {
            if let Some(bitrate) = bitrate {
                config.render.bitrate = bitrate;
            }
            if let Some(fps) = fps {
                config.render.fps = fps;
            }
            config.render.flip |= flip;
            run_render(&mut config, &pipeline, output, plan)
        }
        Commands::Project { pipeline, output } => run_project(&mut config, &pipeline, output),
        Commands::Schedule {
            pipeline,
            video,
            output,
        } => run_schedule(&mut config, &pipeline, video, output),
        Commands::Beats {
            audio,
            steady,
            output,
        } => {
            config.analysis.steady_grid |= steady;
            run_beats(&config, audio, output)
        }
    }
}

fn run_render(
    config: &mut ClipperConfig,
    args: &PipelineArgs,
    output: PathBuf,
    plan_path: Option<PathBuf>,
) -> Result<()> {
    let (_, timeline) = build_timeline(config, args)?;
    let plan = RenderPlanExporter::new(&args.audio, output, config.render.clone()).export(&timeline)?;

    if let Some(path) = plan_path {
        fs::write(&path, serde_json::to_string_pretty(&plan)?)?;
        tracing::info!(path = %path.display(), "wrote render plan");
    }

    FfmpegRenderer::new().render(&plan)
}

fn run_project(config: &mut ClipperConfig, args: &PipelineArgs, output: PathBuf) -> Result<()> {
    let (pool, timeline) = build_timeline(config, args)?;
    let document = ProjectFileExporter::new(&args.audio, &pool).export(&timeline)?;

    fs::write(&output, document.to_mlt()?)?;
    tracing::info!(
        path = %output.display(),
        clips = document.video_track.len(),
        "wrote project file"
    );
    Ok(())
}

fn run_schedule(
    config: &mut ClipperConfig,
    args: &PipelineArgs,
    video: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let (_, timeline) = build_timeline(config, args)?;
    let plan = RenderPlanExporter::new(&args.audio, video, config.render.clone()).export(&timeline)?;
    let json = serde_json::to_string_pretty(&plan)?;

    match output {
        Some(path) => {
            fs::write(&path, json)?;
            tracing::info!(path = %path.display(), "wrote render plan");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_beats(config: &ClipperConfig, path: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let soundtrack = decode_mono(&path, config.analysis.sample_rate)?;
    let grid = detect_beats(soundtrack.samples(), &config.analysis)?;

    match output {
        Some(output) => {
            audio::save_beats(&output, &grid)?;
            tracing::info!(path = %output.display(), beats = grid.count(), "wrote beat list");
        }
        None => println!("{}", audio::beats_to_json(&grid)?),
    }
    Ok(())
}

/// Shared front half of every pipeline: beats, pool, parameters, schedule.
fn build_timeline(config: &mut ClipperConfig, args: &PipelineArgs) -> Result<(ClipPool, Timeline)> {
    args.apply(config);
    tracing::info!(
        audio = %args.audio.display(),
        videos = args.videos.len(),
        seed = %config.schedule.seed,
        multiplier = config.schedule.multiplier,
        "preparing schedule"
    );

    let prober = FfprobeProber::new();
    let (grid, soundtrack_length) = soundtrack_beats(config, args, &prober)?;
    let pool = build_pool(&prober, &args.videos, config.trim)?;
    let parameters = config.schedule.parameters(soundtrack_length)?;

    let mut sequencer = SeededSequencer::new(config.schedule.seed.clone());
    let timeline = schedule(&grid, &pool, &mut sequencer, &parameters)?;
    Ok((pool, timeline))
}

fn soundtrack_beats(
    config: &ClipperConfig,
    args: &PipelineArgs,
    prober: &FfprobeProber,
) -> Result<(BeatGrid, f64)> {
    match &args.beats {
        Some(beats) => {
            let grid = load_beats(beats)?;
            let length = prober.probe(&args.audio)?.duration;
            Ok((grid, length))
        }
        None => {
            let soundtrack = decode_mono(&args.audio, config.analysis.sample_rate)?;
            let grid = detect_beats(soundtrack.samples(), &config.analysis)?;
            Ok((grid, soundtrack.duration_seconds()))
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cut footage together on the beats of a song", long_about = None)]
struct Cli {
    /// JSON configuration file; command line flags take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule the footage and render the final video with ffmpeg.
    Render {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// The name of the output file.
        #[arg(short, long, default_value = "result.mp4")]
        output: PathBuf,
        #[arg(long)]
        bitrate: Option<String>,
        #[arg(long)]
        fps: Option<u32>,
        /// Rotate by 180 degrees.
        #[arg(long)]
        flip: bool,
        /// Also write the render plan as JSON.
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Schedule the footage and write a Shotcut (MLT) project instead of rendering.
    Project {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(short, long, default_value = "result.mlt")]
        output: PathBuf,
    },
    /// Print or write the render plan without rendering.
    Schedule {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Video path recorded in the plan.
        #[arg(long, default_value = "result.mp4")]
        video: PathBuf,
        /// Plan destination; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect the beats of an audio file and dump them as JSON.
    Beats {
        audio: PathBuf,
        /// Evenly space the beats at the median detected interval.
        #[arg(long)]
        steady: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// File path of the audio track.
    #[arg(long)]
    audio: PathBuf,
    /// Precomputed beat list (JSON) instead of detecting beats.
    #[arg(long)]
    beats: Option<PathBuf>,
    /// Length of the resulting video in seconds.
    #[arg(long)]
    length: Option<f64>,
    /// Number of beats between cuts.
    #[arg(long)]
    multiplier: Option<u32>,
    #[arg(long)]
    seed: Option<String>,
    /// Segments that must pass before a clip may be reused.
    #[arg(long)]
    min_repeat_gap: Option<usize>,
    /// Abort instead of shortening slots that no clip can fill.
    #[arg(long)]
    fail_on_unfit: bool,
    /// Evenly space detected beats.
    #[arg(long)]
    steady: bool,
    /// Seconds skipped at the start of every clip.
    #[arg(long)]
    trim_head: Option<f64>,
    /// Seconds skipped at the end of every clip.
    #[arg(long)]
    trim_tail: Option<f64>,
    /// Video files to process.
    #[arg(required = true)]
    videos: Vec<PathBuf>,
}

impl PipelineArgs {
    fn apply(&self, config: &mut ClipperConfig) {
        let schedule = &mut config.schedule;
        if let Some(length) = self.length {
            schedule.target_length = Some(length);
        }
        if let Some(multiplier) = self.multiplier {
            schedule.multiplier = multiplier;
        }
        if let Some(seed) = &self.seed {
            schedule.seed = seed.clone().into();
        }
        if let Some(gap) = self.min_repeat_gap {
            schedule.min_repeat_gap = Some(gap);
        }
        if self.fail_on_unfit {
            schedule.fallback = FallbackPolicy::Fail;
        }
        config.analysis.steady_grid |= self.steady;
        if let Some(head) = self.trim_head {
            config.trim.head = head;
        }
        if let Some(tail) = self.trim_tail {
            config.trim.tail = tail;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clipper_core::Seed;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "clipper",
            "schedule",
            "--audio",
            "song.mp3",
            "--multiplier",
            "4",
            "--seed",
            "42",
            "--fail-on-unfit",
            "--trim-head",
            "0.5",
            "a.mp4",
            "b.mp4",
        ]);
        let Commands::Schedule { pipeline, .. } = cli.command else {
            panic!("expected the schedule subcommand");
        };

        let mut config = ClipperConfig::default();
        pipeline.apply(&mut config);

        assert_eq!(pipeline.videos.len(), 2);
        assert_eq!(config.schedule.multiplier, 4);
        assert_eq!(config.schedule.seed, Seed::Text("42".to_string()));
        assert_eq!(config.schedule.fallback, FallbackPolicy::Fail);
        assert_eq!(config.trim.head, 0.5);
        assert_eq!(config.schedule.target_length, None);
    }

    #[test]
    fn render_uses_default_output_and_settings() {
        let cli = Cli::parse_from(["clipper", "render", "--audio", "song.mp3", "a.mp4"]);
        let Commands::Render {
            output,
            bitrate,
            flip,
            ..
        } = cli.command
        else {
            panic!("expected the render subcommand");
        };

        assert_eq!(output, PathBuf::from("result.mp4"));
        assert!(bitrate.is_none());
        assert!(!flip);
    }
}
