//! The field-service pipeline: visits, routes, monthly rollup.
//!
//! Every run is recorded in a [`RunJournal`] that is written to
//! `otchet_service.txt` whatever the outcome, so a failed or faulted run
//! still leaves its full log behind.

pub mod rollup;
pub mod routes;
pub mod visits;

pub use rollup::RollupStage;
pub use routes::RoutesStage;
pub use visits::VisitsStage;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::{Artifact, ArtifactKind};
use crate::events::{ProgressSink, RunJournal};
use crate::pipelines::files::{ROUTES_MAP, SERVICE_LOG};
use crate::pipelines::{run_stages, Pipeline, PipelineContext};
use crate::sources::GeocodeProvider;
use crate::stages::Stage;

/// Display name of the service pipeline.
pub const NAME: &str = "Field service";

const BANNER: &str = "SERVICE PARSING";

/// Technician visits and routes of the previous month.
#[derive(Debug, Clone)]
pub struct ServicePipeline {
    ctx: PipelineContext,
    geocoder: Arc<dyn GeocodeProvider>,
}

impl ServicePipeline {
    /// Creates the pipeline.
    pub fn new(ctx: PipelineContext, geocoder: Arc<dyn GeocodeProvider>) -> Self {
        Self { ctx, geocoder }
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(VisitsStage::new(self.ctx.clone())),
            Box::new(RoutesStage::new(self.ctx.clone(), self.geocoder.clone())),
            Box::new(RollupStage::new(self.ctx.clone())),
        ]
    }
}

#[async_trait]
impl Pipeline for ServicePipeline {
    fn name(&self) -> &str {
        NAME
    }

    fn stage_labels(&self) -> Vec<String> {
        self.stages().iter().map(|s| s.label().to_string()).collect()
    }

    async fn run_full_cycle(&self, notify: Arc<dyn ProgressSink>) -> bool {
        info!("Starting service pipeline");
        let journal = Arc::new(RunJournal::with_banner(notify, BANNER, self.ctx.clock.now()));

        let success = match run_stages(&self.ctx, NAME, self.stages(), journal.clone()).await {
            Ok(report) => report.is_success(),
            Err(e) => {
                error!(error = %e, "Service pipeline could not start");
                journal.write_line(format!("❌ {e}"));
                false
            }
        };

        let log = self.ctx.data.path(SERVICE_LOG);
        if let Err(e) = journal.persist(&log) {
            warn!(path = %log.display(), error = %e, "Could not save service log");
        }
        success
    }

    fn artifacts(&self) -> Vec<Artifact> {
        [
            (ArtifactKind::Log, SERVICE_LOG, "📄 Service run log"),
            (ArtifactKind::Map, ROUTES_MAP, "🗺 Technician routes map"),
        ]
        .into_iter()
        .map(|(kind, file, caption)| Artifact::new(kind, self.ctx.data.path(file), caption))
        .filter(Artifact::exists)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::pipelines::files::{MONTHLY_ROLLUP, SERVICE_MONTH};
    use crate::testing::{fixture_context, write_fixture, FakeGeocoder};
    use crate::utils::LatLon;
    use tempfile::tempdir;

    const LOG: &str = "Дата,Подія,Апарат\n\
                       2024-02-03 09:00:00,Service ON - Ivan,\"Зелена, 5\"\n\
                       2024-02-03 09:20:00,Service OFF,\"Зелена, 5\"\n\
                       2024-02-03 10:00:00,Service ON - Ivan,\"Лесі, 1\"\n\
                       2024-02-03 10:45:00,Service OFF,\"Лесі, 1\"\n";

    fn geocoder() -> Arc<FakeGeocoder> {
        Arc::new(
            FakeGeocoder::new()
                .with_place("Зелена, 5", LatLon::new(49.84, 24.03))
                .with_place("Лесі, 1", LatLon::new(49.85, 24.03)),
        )
    }

    #[tokio::test]
    async fn test_full_cycle_leaves_log_and_map() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), SERVICE_MONTH, LOG).unwrap();
        let pipeline = ServicePipeline::new(fixture_context(dir.path()), geocoder());
        let sink = Arc::new(CollectingSink::new());

        assert!(pipeline.run_full_cycle(sink.clone()).await);

        let kinds: Vec<ArtifactKind> = pipeline.artifacts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::Log, ArtifactKind::Map]);
        let log = std::fs::read_to_string(dir.path().join(SERVICE_LOG)).unwrap();
        assert!(log.starts_with(&"=".repeat(60)));
        assert!(log.contains("🚀 SERVICE PARSING"));
        assert!(log.contains("📅 2024-03-10 12:00:00"));
        assert!(log.contains("Ivan: 1 days"));
        assert!(log.contains("Field service COMPLETE"));
        assert!(dir.path().join(MONTHLY_ROLLUP).is_file());
    }

    #[tokio::test]
    async fn test_failed_run_still_persists_log() {
        let dir = tempdir().unwrap();
        let pipeline = ServicePipeline::new(fixture_context(dir.path()), geocoder());
        let sink = Arc::new(CollectingSink::new());

        assert!(!pipeline.run_full_cycle(sink.clone()).await);

        let log = std::fs::read_to_string(dir.path().join(SERVICE_LOG)).unwrap();
        assert!(log.contains("service_mes.csv not found"));
        assert!(log.contains("Stopped: error at stage Visits"));
        assert!(!dir.path().join(ROUTES_MAP).exists());
        assert_eq!(pipeline.artifacts().len(), 1);
    }

    #[tokio::test]
    async fn test_rollup_warning_does_not_fail_run() {
        let dir = tempdir().unwrap();
        // Only an anonymous visit: visits and routes succeed, the rollup
        // finds nothing to count and warns.
        write_fixture(
            dir.path(),
            SERVICE_MONTH,
            "Дата,Подія,Апарат\n\
             2024-02-04 08:00:00,Service ON,Шевченка 12\n\
             2024-02-04 08:10:00,Service OFF,Шевченка 12\n",
        )
        .unwrap();
        let pipeline = ServicePipeline::new(fixture_context(dir.path()), geocoder());
        let sink = Arc::new(CollectingSink::new());

        assert!(pipeline.run_full_cycle(sink.clone()).await);
        assert!(sink.contains("⚠️ No Service ON/OFF pairs with a technician"));
        assert!(sink.contains("Field service COMPLETE"));
    }
}
