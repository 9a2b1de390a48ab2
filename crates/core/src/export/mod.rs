//! Conversions from a finished [`Timeline`] into documents for downstream
//! tools. Exporters are pure: persisting the document is the caller's job.

mod mlt;
mod project;
mod render_plan;

pub use project::{ProjectAudio, ProjectClip, ProjectDocument, ProjectFileExporter, ProjectSource};
pub use render_plan::{RenderEntry, RenderPlan, RenderPlanExporter};

use crate::{Result, Timeline};

/// Shared capability of every timeline output format.
pub trait TimelineExporter {
    type Document;

    fn export(&self, timeline: &Timeline) -> Result<Self::Document>;
}
