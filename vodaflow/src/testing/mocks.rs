//! Mock stages for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::StageOutcome;
use crate::errors::VodaflowError;
use crate::stages::{Stage, StageProgress};

/// A scripted stage: reports a fixed list of progress steps, then returns a
/// configurable outcome. Counts how often it ran.
#[derive(Debug)]
pub struct MockStage {
    label: String,
    steps: Vec<(f64, String)>,
    outcome: StageOutcome,
    calls: Arc<AtomicUsize>,
}

impl MockStage {
    /// Creates a new mock stage that succeeds without reporting.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            outcome: StageOutcome::Ok,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Adds a progress step.
    #[must_use]
    pub fn with_step(mut self, percent: f64, message: impl Into<String>) -> Self {
        self.steps.push((percent, message.into()));
        self
    }

    /// Sets the outcome to return.
    #[must_use]
    pub fn with_outcome(mut self, outcome: StageOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Makes the stage fail.
    #[must_use]
    pub fn failing(self) -> Self {
        self.with_outcome(StageOutcome::Fail)
    }

    /// Returns a handle to the call counter, usable after the stage has been
    /// moved into a runner.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome, VodaflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (percent, message) in &self.steps {
            progress.report(*percent, message.clone()).await;
        }
        Ok(self.outcome)
    }
}

/// A stage that lets an error escape.
#[derive(Debug)]
pub struct ErroringStage {
    label: String,
    message: String,
}

impl ErroringStage {
    /// Creates a new erroring stage.
    #[must_use]
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for ErroringStage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, _progress: &StageProgress) -> Result<StageOutcome, VodaflowError> {
        Err(VodaflowError::Internal(self.message.clone()))
    }
}

/// A stage that panics.
#[derive(Debug)]
pub struct PanickingStage {
    label: String,
    message: String,
}

impl PanickingStage {
    /// Creates a new panicking stage.
    #[must_use]
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn label(&self) -> &str {
        &self.label
    }

    #[allow(clippy::panic)]
    async fn run(&self, _progress: &StageProgress) -> Result<StageOutcome, VodaflowError> {
        panic!("{}", self.message);
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    label: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(label: impl Into<String>, ms: u64) -> Self {
        Self {
            label: label.into(),
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome, VodaflowError> {
        tokio::time::sleep(self.delay).await;
        progress.report(100.0, "slept").await;
        Ok(StageOutcome::Ok)
    }
}
