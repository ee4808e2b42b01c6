//! Business pipelines.
//!
//! A pipeline binds a fixed, ordered stage list to one workflow. The stage
//! list is built fresh on every run and handed to a [`StageRunner`]; the
//! facade only adds pipeline-specific post-processing (summaries, persisted
//! logs, artifact lists).
//!
//! Running the same pipeline twice at once over the same data directory is
//! not safe. The dispatcher's scheduler prevents it.

pub mod cash;
pub mod files;
pub mod operational;
pub mod service;

pub use cash::CashPipeline;
pub use files::DataDir;
pub use operational::OperationalPipeline;
pub use service::ServicePipeline;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::VodaflowConfig;
use crate::core::{Artifact, StageOutcome};
use crate::errors::Result;
use crate::events::ProgressSink;
use crate::pipeline::{RunReport, StageRunner};
use crate::stages::{Stage, StageProgress};
use crate::utils::Clock;

/// Entry point of one business workflow.
#[async_trait]
pub trait Pipeline: Send + Sync + Debug {
    /// Display name.
    fn name(&self) -> &str;

    /// Labels of the stages, in run order.
    fn stage_labels(&self) -> Vec<String>;

    /// Runs every stage in order and returns true if all succeeded.
    async fn run_full_cycle(&self, notify: Arc<dyn ProgressSink>) -> bool;

    /// A short human-readable result of the last successful run.
    fn summary_text(&self) -> Option<String> {
        None
    }

    /// Files the last run left for the operator.
    fn artifacts(&self) -> Vec<Artifact> {
        Vec::new()
    }
}

/// What every stage needs besides its data sources.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Where stage files live.
    pub data: DataDir,
    /// Loaded configuration.
    pub config: Arc<VodaflowConfig>,
    /// Wall clock, injectable for tests.
    pub clock: Arc<dyn Clock>,
}

impl PipelineContext {
    /// Creates a context using `config.data_dir`.
    #[must_use]
    pub fn new(config: Arc<VodaflowConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: DataDir::new(config.data_dir.clone()),
            config,
            clock,
        }
    }
}

/// Builds a runner over `stages` and runs it.
pub(crate) async fn run_stages(
    ctx: &PipelineContext,
    name: &str,
    stages: Vec<Box<dyn Stage>>,
    notify: Arc<dyn ProgressSink>,
) -> Result<RunReport> {
    let runner = StageRunner::new(name, stages, ctx.config.runner.clone())?;
    Ok(runner.run(notify).await)
}

/// Converts a handled error of a required stage into a reported failure.
pub(crate) async fn required(
    progress: &StageProgress,
    result: Result<StageOutcome>,
) -> Result<StageOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => Ok(progress.fail(0.0, e.to_string()).await),
    }
}

/// Converts any error of a best-effort stage into a warning.
pub(crate) async fn best_effort(
    progress: &StageProgress,
    result: Result<StageOutcome>,
) -> Result<StageOutcome> {
    match result {
        Ok(_) => Ok(StageOutcome::Ok),
        Err(e) => Ok(progress.warn(100.0, e.to_string()).await),
    }
}

/// Stage-local percent for item `index` of `total`, spread over
/// `[from, from + span]`.
pub(crate) fn item_percent(from: f64, span: f64, index: usize, total: usize) -> f64 {
    if total == 0 {
        return from;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = index as f64 / total as f64;
    from + ratio * span
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;

    #[test]
    fn test_item_percent() {
        assert!((item_percent(20.0, 60.0, 0, 4) - 20.0).abs() < f64::EPSILON);
        assert!((item_percent(20.0, 60.0, 2, 4) - 50.0).abs() < f64::EPSILON);
        assert!((item_percent(20.0, 60.0, 0, 0) - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_required_and_best_effort_conversion() {
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 1, "x");
        let err = || Err(crate::errors::VodaflowError::Api("down".to_string()));

        assert_eq!(required(&progress, err()).await.unwrap(), StageOutcome::Fail);
        assert_eq!(best_effort(&progress, err()).await.unwrap(), StageOutcome::Ok);
        assert!(sink.contains("❌ API error: down"));
        assert!(sink.contains("⚠️ API error: down"));
    }
}
