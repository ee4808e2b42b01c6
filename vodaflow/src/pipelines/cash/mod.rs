//! The cash-collection pipeline: collect, link technicians, report.

pub mod collect;
pub mod link;
pub mod report;

pub use collect::CollectStage;
pub use link::LinkStage;
pub use report::{CashSummary, ReportStage};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::{Artifact, ArtifactKind};
use crate::events::ProgressSink;
use crate::pipelines::files::{CASH_REPORT, INKAS_LINKED};
use crate::pipelines::{run_stages, Pipeline, PipelineContext};
use crate::sources::DeviceApiSource;
use crate::stages::Stage;
use crate::table::Table;

/// Display name of the cash pipeline.
pub const NAME: &str = "Cash collections";

/// Cash collections of the last weeks, per technician.
#[derive(Debug, Clone)]
pub struct CashPipeline {
    ctx: PipelineContext,
    api: Arc<dyn DeviceApiSource>,
}

impl CashPipeline {
    /// Creates the pipeline.
    pub fn new(ctx: PipelineContext, api: Arc<dyn DeviceApiSource>) -> Self {
        Self { ctx, api }
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(CollectStage::new(self.ctx.clone(), self.api.clone())),
            Box::new(LinkStage::new(self.ctx.clone())),
            Box::new(ReportStage::new(self.ctx.clone())),
        ]
    }
}

#[async_trait]
impl Pipeline for CashPipeline {
    fn name(&self) -> &str {
        NAME
    }

    fn stage_labels(&self) -> Vec<String> {
        self.stages().iter().map(|s| s.label().to_string()).collect()
    }

    async fn run_full_cycle(&self, notify: Arc<dyn ProgressSink>) -> bool {
        info!("Starting cash pipeline");
        match run_stages(&self.ctx, NAME, self.stages(), notify).await {
            Ok(report) => report.is_success(),
            Err(e) => {
                error!(error = %e, "Cash pipeline could not start");
                false
            }
        }
    }

    /// Recomputed from `inki5nedel.csv`, so it reflects the last run that
    /// got past the linking stage.
    fn summary_text(&self) -> Option<String> {
        match Table::read(&self.ctx.data.path(INKAS_LINKED)) {
            Ok(table) => Some(CashSummary::from_table(&table).render_short()),
            Err(e) => {
                warn!(error = %e, "Cash summary unavailable");
                None
            }
        }
    }

    fn artifacts(&self) -> Vec<Artifact> {
        let report = Artifact::new(
            ArtifactKind::Report,
            self.ctx.data.path(CASH_REPORT),
            "📄 Cash collection report",
        );
        if report.exists() {
            vec![report]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::{fixture_context, Endpoint, FakeApi};
    use serde_json::json;
    use tempfile::tempdir;

    fn api() -> FakeApi {
        FakeApi::new()
            .with_device(1, "Зелена 5")
            .with_device(2, "Лесі 1")
            .with_data(
                Endpoint::Inkas,
                1,
                vec![
                    json!({
                        "date": "2024-03-01 10:00:00",
                        "card_id": "23129",
                        "sum": 100,
                        "banknotes": 100,
                        "coins": 0,
                        "descr": ""
                    }),
                    json!({
                        "date": "2024-03-02 10:00:00",
                        "card_id": 1,
                        "sum": 40,
                        "banknotes": 40,
                        "coins": 0,
                        "descr": "Руслан"
                    }),
                ],
            )
    }

    #[tokio::test]
    async fn test_full_cycle_writes_report_and_summary() {
        let dir = tempdir().unwrap();
        let pipeline = CashPipeline::new(fixture_context(dir.path()), Arc::new(api()));
        let sink = Arc::new(CollectingSink::new());

        assert!(pipeline.summary_text().is_none());
        let ok = pipeline.run_full_cycle(sink.clone()).await;

        assert!(ok);
        assert_eq!(pipeline.artifacts().len(), 1);
        let summary = pipeline.summary_text().unwrap();
        assert!(summary.contains("👷 igor: 1 / 100.00"));
        assert!(summary.contains("⚠️ Unassigned: 1"));
        assert!(sink.contains("Cash collections COMPLETE"));
    }

    #[tokio::test]
    async fn test_device_list_failure_skips_later_stages() {
        let dir = tempdir().unwrap();
        let pipeline = CashPipeline::new(
            fixture_context(dir.path()),
            Arc::new(FakeApi::new().failing_devices()),
        );
        let sink = Arc::new(CollectingSink::new());

        assert!(!pipeline.run_full_cycle(sink.clone()).await);
        assert!(sink.contains("Stopped: error at stage Collect"));
        assert!(pipeline.artifacts().is_empty());
    }
}
