//! The nine-stage operational data pipeline.
//!
//! Stages 1, 2 and 6 read the management portal, stage 3 the device API;
//! the rest transform files in the data directory. Everything ends up in
//! `idadres.csv` (one row per device) plus the service analytics tables.

pub mod device_api;
pub mod dv6;
pub mod enrichment;
pub mod registry;
pub mod sensor_logs;
pub mod sensor_status;
pub mod service_analytics;
pub mod service_log;

pub use device_api::DeviceApiStage;
pub use dv6::Dv6CyclesStage;
pub use enrichment::{FilterSpeedStage, TdsStage};
pub use registry::DeviceRegistryStage;
pub use sensor_logs::SensorLogStage;
pub use sensor_status::SensorStatusStage;
pub use service_analytics::ServiceAnalyticsStage;
pub use service_log::ServiceLogStage;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::{Artifact, ArtifactKind};
use crate::events::ProgressSink;
use crate::pipelines::files::{IDADRES, SERVICE_ANALYTICS, TECHNICIAN_ANALYTICS};
use crate::pipelines::{run_stages, Pipeline, PipelineContext};
use crate::sources::{DeviceApiSource, PortalSource};
use crate::stages::Stage;

/// Display name of the operational pipeline.
pub const NAME: &str = "Operational data";

/// Device registry, sensor and service data collection.
#[derive(Debug, Clone)]
pub struct OperationalPipeline {
    ctx: PipelineContext,
    portal: Arc<dyn PortalSource>,
    api: Arc<dyn DeviceApiSource>,
}

impl OperationalPipeline {
    /// Creates the pipeline over its two data sources.
    pub fn new(
        ctx: PipelineContext,
        portal: Arc<dyn PortalSource>,
        api: Arc<dyn DeviceApiSource>,
    ) -> Self {
        Self { ctx, portal, api }
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        let ctx = &self.ctx;
        vec![
            Box::new(DeviceRegistryStage::new(ctx.clone(), self.portal.clone())),
            Box::new(SensorLogStage::new(ctx.clone(), self.portal.clone())),
            Box::new(DeviceApiStage::new(ctx.clone(), self.api.clone())),
            Box::new(SensorStatusStage::new(ctx.clone())),
            Box::new(Dv6CyclesStage::new(ctx.clone())),
            Box::new(ServiceLogStage::new(ctx.clone(), self.portal.clone())),
            Box::new(ServiceAnalyticsStage::new(ctx.clone())),
            Box::new(FilterSpeedStage::new(ctx.clone())),
            Box::new(TdsStage::new(ctx.clone())),
        ]
    }
}

#[async_trait]
impl Pipeline for OperationalPipeline {
    fn name(&self) -> &str {
        NAME
    }

    fn stage_labels(&self) -> Vec<String> {
        self.stages().iter().map(|s| s.label().to_string()).collect()
    }

    async fn run_full_cycle(&self, notify: Arc<dyn ProgressSink>) -> bool {
        info!(data_dir = %self.ctx.data.root().display(), "Starting operational pipeline");
        match run_stages(&self.ctx, NAME, self.stages(), notify).await {
            Ok(report) => report.is_success(),
            Err(e) => {
                error!(error = %e, "Operational pipeline could not start");
                false
            }
        }
    }

    fn artifacts(&self) -> Vec<Artifact> {
        [
            (IDADRES, "📋 Device registry"),
            (SERVICE_ANALYTICS, "🛠 Service per apparatus"),
            (TECHNICIAN_ANALYTICS, "👷 Service per technician"),
        ]
        .into_iter()
        .map(|(file, caption)| {
            Artifact::new(ArtifactKind::Table, self.ctx.data.path(file), caption)
        })
        .filter(Artifact::exists)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::pipelines::files::{DEVICE_SENSORS, DV3, DV6, SERVICE_MONTH};
    use crate::table::Table;
    use crate::testing::{fixture_context, Endpoint, FakeApi, FakePortal};
    use serde_json::json;
    use tempfile::tempdir;

    fn page(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut t = Table::new(headers.iter().copied());
        for r in rows {
            t.push_row(r.iter().map(|s| (*s).to_string()).collect());
        }
        t
    }

    fn working_portal() -> FakePortal {
        let log_headers = ["Дата", "Датчик", "Стан", "Значення", "Апарат"];
        FakePortal::new()
            .with_page(
                |q| q.params().len() == 1 && q.get("fid") == Some("2"),
                page(
                    &["ID", "Адреса"],
                    &[&["101", "Зелена, 5 біля АТБ"], &["102", "Шевченка, 12а"]],
                ),
            )
            .with_page(
                |q| q.get("device_stat") == Some("log_general"),
                page(
                    &["ID", "a", "b", "c", "d", "DV2 off"],
                    &[&["101", "", "", "", "", "4"]],
                ),
            )
            .with_page(
                |q| q.get("sensor") == Some("dv3"),
                page(
                    &log_headers,
                    &[&["2024-03-09 08:00:00", "dv3", "ON", "1", "Зелена, 5"]],
                ),
            )
            .with_page(
                |q| q.get("sensor") == Some("dv6"),
                page(
                    &log_headers,
                    &[
                        &["2024-03-09 10:00:00", "dv6", "on", "", "Зелена, 5"],
                        &["2024-03-09 10:20:00", "dv6", "off", "", "Зелена, 5"],
                    ],
                ),
            )
            .with_page(
                |q| q.get("system") == Some("Service") && q.get("date_month_start") == Some("2"),
                page(
                    &["Дата", "Подія", "Апарат"],
                    &[
                        &["2024-02-03 10:00:00", "Service ON - Ivan", "Зелена, 5"],
                        &["2024-02-03 10:30:00", "Service OFF", "Зелена, 5"],
                    ],
                ),
            )
    }

    fn working_api() -> FakeApi {
        FakeApi::new()
            .with_device(101, "Зелена, 5")
            .with_device(102, "Шевченка, 12а")
            .with_data(
                Endpoint::Quality,
                101,
                vec![json!({"date": "2024-03-05 08:00:00", "tds": "61"})],
            )
            .with_data(
                Endpoint::Sensors,
                101,
                vec![json!({
                    "date": "2024-03-10 08:00:00",
                    "name": "dv1",
                    "state": "1",
                    "sens_val": "",
                    "descr": ""
                })],
            )
            .with_data(
                Endpoint::FilterSpeed,
                101,
                vec![
                    json!({"date": "2024-03-09 08:00:00", "speed": "1.5"}),
                    json!({"date": "2024-03-10 08:00:00", "speed": "2.5"}),
                ],
            )
    }

    #[test]
    fn test_nine_stages_in_order() {
        let dir = tempdir().unwrap();
        let pipeline = OperationalPipeline::new(
            fixture_context(dir.path()),
            Arc::new(FakePortal::new()),
            Arc::new(FakeApi::new()),
        );
        let labels = pipeline.stage_labels();
        assert_eq!(labels.len(), 9);
        assert_eq!(labels[0], "Device registry");
        assert_eq!(labels[8], "TDS");
    }

    #[tokio::test]
    async fn test_login_failure_stops_everything() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let pipeline = OperationalPipeline::new(
            fixture_context(dir.path()),
            Arc::new(FakePortal::new().rejecting_login()),
            api.clone(),
        );
        let sink = Arc::new(CollectingSink::new());

        let ok = pipeline.run_full_cycle(sink.clone()).await;

        assert!(!ok);
        assert_eq!(api.device_calls(), 0);
        assert!(sink.contains("Stopped: error at stage Device registry"));
        assert!(pipeline.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_full_cycle_completes_and_writes_artifacts() {
        let dir = tempdir().unwrap();
        let api = Arc::new(working_api());
        let pipeline = OperationalPipeline::new(
            fixture_context(dir.path()),
            Arc::new(working_portal()),
            api.clone(),
        );
        let sink = Arc::new(CollectingSink::new());

        let ok = pipeline.run_full_cycle(sink.clone()).await;

        assert!(ok);
        assert_eq!(api.device_calls(), 1);
        let last = sink.texts().pop().unwrap_or_default();
        assert!(last.contains("Operational data COMPLETE"), "{last}");
        assert!(!sink.contains("Stopped: error at stage"));
        for file in [DV3, DV6, DEVICE_SENSORS, SERVICE_MONTH] {
            assert!(dir.path().join(file).exists(), "{file}");
        }

        let artifacts = pipeline.artifacts();
        assert_eq!(artifacts.len(), 3);
        assert!(artifacts.iter().all(Artifact::exists));

        let registry = Table::read(&dir.path().join(IDADRES)).unwrap();
        let rows: Vec<_> = registry.iter().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("adress"), "Зелена, 5");
        assert_eq!(rows[0].get("dv2day"), "4");
        assert_eq!(rows[0].get("dv6raz"), "1");
        assert_eq!(rows[1].get("dv6raz"), "0");
    }
}
