//! Stage trait and implementations.
//!
//! Stages are the units of work of a pipeline. They run strictly in order,
//! exchange data only through files, and report progress through the
//! [`StageProgress`] handle the runner gives them.

mod progress;

pub use progress::StageProgress;

use crate::core::StageOutcome;
use crate::errors::VodaflowError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage that hits an unrecoverable condition reports it through
/// `progress` and returns `Ok(StageOutcome::Fail)`. An `Err` escaping `run`
/// is treated by the runner as a fault.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the human-readable label of the stage.
    fn label(&self) -> &str;

    /// Runs the stage.
    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome, VodaflowError>;
}

/// A stage that does nothing and succeeds.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    label: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, _progress: &StageProgress) -> Result<StageOutcome, VodaflowError> {
        Ok(StageOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, NoOpSink};
    use std::sync::Arc;

    #[test]
    fn test_noop_stage_on_a_silent_sink() {
        let stage = NoOpStage::new("test");
        assert_eq!(stage.label(), "test");

        let progress = StageProgress::new(Arc::new(NoOpSink), 0, 1, "test");
        let outcome = tokio_test::block_on(stage.run(&progress)).unwrap();
        assert_eq!(outcome, StageOutcome::Ok);
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 1, "noop");

        assert!(stage.run(&progress).await.unwrap().is_success());
        assert!(sink.is_empty());
    }
}
