//! Core domain model types for vodaflow.
//!
//! This module contains the fundamental types shared by stages, the runner
//! and the progress sinks:
//! - Stage outcome
//! - Structured progress events and their text rendering
//! - Global percent arithmetic and the progress bar
//! - Report artifacts produced by pipelines

mod artifact;
mod event;
mod progress;
mod status;

pub use artifact::{Artifact, ArtifactKind};
pub use event::ProgressEvent;
pub use progress::{format_elapsed_minutes, global_percent, progress_bar, BAR_LENGTH};
pub use status::StageOutcome;
