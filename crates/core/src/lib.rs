//! Core library for clipper, which cuts footage together on the beats of a
//! soundtrack.
//!
//! The heart of the crate is the [`ClipScheduler`]: given a [`BeatGrid`] and a
//! [`ClipPool`] it deterministically produces a [`Timeline`] of beat-aligned
//! segments for a given seed. Timelines are turned into documents for
//! downstream tools by the [`TimelineExporter`] implementations. The remaining
//! modules wrap the external collaborators (ffmpeg, ffprobe and a simple beat
//! detector) that feed and consume the scheduler.

pub mod analysis;
pub mod audio;
pub mod beats;
pub mod config;
pub mod error;
pub mod export;
pub mod media;
pub mod pool;
pub mod probe;
pub mod render;
pub mod schedule;
pub mod sequencer;
pub mod time;
pub mod timeline;

pub use analysis::{detect_beats, AnalysisConfig, AnalysisFrame, AnalysisSummary, BeatDetector};
pub use audio::{beats_to_json, decode_mono, load_beats, save_beats, Soundtrack};
pub use beats::BeatGrid;
pub use config::{ClipperConfig, ScheduleConfig};
pub use error::{ClipperError, Result};
pub use export::{
    ProjectAudio, ProjectClip, ProjectDocument, ProjectFileExporter, ProjectSource, RenderEntry,
    RenderPlan, RenderPlanExporter, TimelineExporter,
};
pub use pool::{ClipId, ClipPool, MediaInfo, SourceClip};
pub use probe::{build_pool, ClipProber, ClipTrim, FfprobeProber, ProbedMedia};
pub use render::{FfmpegRenderer, RenderSettings, Resolution};
pub use schedule::{schedule, ClipScheduler, FallbackPolicy, ScheduleParameters};
pub use sequencer::{Seed, SeededSequencer, DEFAULT_SEED};
pub use time::Timecode;
pub use timeline::{Segment, Timeline};
