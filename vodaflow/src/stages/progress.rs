//! The per-stage progress handle.

use crate::core::{global_percent, ProgressEvent, StageOutcome};
use crate::events::ProgressSink;
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress callback handed to a running stage.
///
/// Rescales the stage's local percent into the pipeline-wide percent and
/// forwards the resulting event to the sink.
#[derive(Clone)]
pub struct StageProgress {
    sink: Arc<dyn ProgressSink>,
    index: usize,
    total: usize,
    label: String,
}

impl std::fmt::Debug for StageProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProgress")
            .field("index", &self.index)
            .field("total", &self.total)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl StageProgress {
    /// Creates a handle for the stage at `index` of `total`.
    #[must_use]
    pub fn new(
        sink: Arc<dyn ProgressSink>,
        index: usize,
        total: usize,
        label: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            index,
            total: total.max(1),
            label: label.into(),
        }
    }

    /// Returns the stage label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the 0-based stage position.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reports stage-local progress in `[0, 100]`.
    ///
    /// Out-of-range values are clamped.
    pub async fn report(&self, local_percent: f64, message: impl Into<String>) {
        let local = if local_percent.is_nan() {
            0.0
        } else {
            local_percent.clamp(0.0, 100.0)
        };
        let message = message.into();
        debug!(stage = %self.label, percent = local, "{}", message);
        let event = ProgressEvent::StageProgress {
            index: self.index,
            total: self.total,
            label: self.label.clone(),
            local_percent: local,
            global_percent: global_percent(self.index, self.total, local),
            message,
        };
        self.sink.record(&event).await;
    }

    /// Records a diagnostic line that is logged but not displayed.
    pub async fn detail(&self, message: impl Into<String>) {
        let event = ProgressEvent::Detail {
            label: self.label.clone(),
            message: message.into(),
        };
        self.sink.record(&event).await;
    }

    /// Reports a warning and returns [`StageOutcome::Ok`].
    ///
    /// Used by best-effort stages and for non-fatal gaps in data.
    pub async fn warn(&self, local_percent: f64, message: impl Into<String>) -> StageOutcome {
        let message = message.into();
        warn!(stage = %self.label, "{}", message);
        self.report(local_percent, format!("⚠️ {message}")).await;
        StageOutcome::Ok
    }

    /// Reports a failure diagnostic and returns [`StageOutcome::Fail`].
    pub async fn fail(&self, local_percent: f64, message: impl Into<String>) -> StageOutcome {
        let message = message.into();
        warn!(stage = %self.label, "Stage failed: {}", message);
        self.report(local_percent, format!("❌ {message}")).await;
        StageOutcome::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;

    #[tokio::test]
    async fn test_report_rescales() {
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 1, 4, "Device API");

        progress.report(50.0, "half").await;

        let percents = sink.global_percents();
        assert_eq!(percents.len(), 1);
        assert!((percents[0] - 37.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_report_clamps_local_percent() {
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 2, "s");

        progress.report(400.0, "over").await;
        progress.report(-1.0, "under").await;

        match &sink.events()[0] {
            ProgressEvent::StageProgress { local_percent, global_percent, .. } => {
                assert!((*local_percent - 100.0).abs() < 1e-9);
                assert!((*global_percent - 50.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!((sink.global_percents()[1]).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_warn_and_fail_markers() {
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 1, "TDS");

        assert_eq!(progress.warn(100.0, "no data").await, StageOutcome::Ok);
        assert_eq!(progress.fail(0.0, "missing file").await, StageOutcome::Fail);

        assert!(sink.contains("⚠️ no data"));
        assert!(sink.contains("❌ missing file"));
    }

    #[tokio::test]
    async fn test_detail_not_displayed() {
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 1, "s");

        progress.detail("only in logs").await;

        assert!(sink.texts().is_empty());
        assert_eq!(sink.events().len(), 1);
    }
}
