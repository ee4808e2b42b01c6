//! Sequential stage runner.
//!
//! Runs a fixed list of stages in order, rescales their progress into a
//! pipeline-wide percent and stops at the first failure. Faults escaping a
//! stage (errors or panics) are caught here and reported as terminal events.

use crate::config::RunnerConfig;
use crate::core::{ProgressEvent, StageOutcome};
use crate::errors::VodaflowError;
use crate::events::ProgressSink;
use crate::stages::{Stage, StageProgress};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every stage succeeded.
    Completed,
    /// A stage returned a handled failure.
    Failed {
        /// Label of the failing stage.
        stage: String,
    },
    /// A stage escaped its own error handling.
    Faulted {
        /// Label of the faulting stage.
        stage: String,
        /// Description of the fault.
        error: String,
    },
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier used in log spans.
    pub run_id: Uuid,
    /// How the run ended.
    pub status: RunStatus,
    /// Number of stages that returned success.
    pub completed_stages: usize,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl RunReport {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}

/// Runs an ordered list of stages.
#[derive(Debug)]
pub struct StageRunner {
    name: String,
    stages: Vec<Box<dyn Stage>>,
    config: RunnerConfig,
}

impl StageRunner {
    /// Creates a runner.
    ///
    /// An empty stage list is rejected because the global percent is
    /// undefined for it.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<Box<dyn Stage>>,
        config: RunnerConfig,
    ) -> Result<Self, VodaflowError> {
        let name = name.into();
        if stages.is_empty() {
            return Err(VodaflowError::Validation(format!(
                "pipeline '{name}' has no stages"
            )));
        }
        Ok(Self {
            name,
            stages,
            config,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage labels in execution order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.label()).collect()
    }

    /// Runs every stage in order, reporting to `sink`.
    pub async fn run(&self, sink: Arc<dyn ProgressSink>) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", name = %self.name, run_id = %run_id);
        self.run_inner(run_id, sink).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, sink: Arc<dyn ProgressSink>) -> RunReport {
        let started = Instant::now();
        let total = self.stages.len();
        info!(stages = total, "Pipeline started");
        sink.record(&ProgressEvent::PipelineStarted {
            pipeline: self.name.clone(),
            total,
        })
        .await;

        for (index, stage) in self.stages.iter().enumerate() {
            let label = stage.label().to_string();
            let progress = StageProgress::new(sink.clone(), index, total, label.clone());
            info!(stage = %label, index = index + 1, total, "Stage started");

            let result = AssertUnwindSafe(stage.run(&progress)).catch_unwind().await;
            let fault = match result {
                Ok(Ok(StageOutcome::Ok)) => None,
                Ok(Ok(StageOutcome::Fail)) => {
                    warn!(stage = %label, "Stage failed, stopping pipeline");
                    sink.record(&ProgressEvent::StageFailed {
                        index,
                        label: label.clone(),
                    })
                    .await;
                    return RunReport {
                        run_id,
                        status: RunStatus::Failed { stage: label },
                        completed_stages: index,
                        elapsed: started.elapsed(),
                    };
                }
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            if let Some(error) = fault {
                error!(stage = %label, error = %error, "Stage fault");
                sink.record(&ProgressEvent::StageFault {
                    index,
                    label: label.clone(),
                    error: error.clone(),
                })
                .await;
                return RunReport {
                    run_id,
                    status: RunStatus::Faulted { stage: label, error },
                    completed_stages: index,
                    elapsed: started.elapsed(),
                };
            }

            info!(stage = %label, "Stage completed");
            let pause = self.config.stage_pause();
            if index + 1 < total && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(elapsed_ms, "Pipeline completed");
        sink.record(&ProgressEvent::PipelineCompleted {
            pipeline: self.name.clone(),
            elapsed,
        })
        .await;

        RunReport {
            run_id,
            status: RunStatus::Completed,
            completed_stages: total,
            elapsed,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpSink;
    use crate::stages::NoOpStage;

    #[test]
    fn test_empty_stage_list_rejected() {
        let err = StageRunner::new("empty", Vec::new(), RunnerConfig::immediate()).unwrap_err();
        assert!(matches!(err, VodaflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_labels_in_order() {
        let stages: Vec<Box<dyn Stage>> =
            vec![Box::new(NoOpStage::new("a")), Box::new(NoOpStage::new("b"))];
        let runner = StageRunner::new("p", stages, RunnerConfig::immediate()).unwrap();

        assert_eq!(runner.labels(), vec!["a", "b"]);
        assert_eq!(runner.stage_count(), 2);
        let report = runner.run(Arc::new(NoOpSink)).await;
        assert!(report.is_success());
        assert_eq!(report.completed_stages, 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(payload.as_ref()), "stage panicked");
    }
}
