//! Stage 3: telemetry from the device API.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{
    DEVICES, DEVICE_INKAS, DEVICE_SENSORS, FILTER_SPEED, WATER_QUALITY, WATER_STATS,
};
use crate::pipelines::{item_percent, required, PipelineContext};
use crate::sources::api::{device_id, value_text};
use crate::sources::{ApiEnvelope, ApiRange, DeviceApiSource, Record};
use crate::stages::{Stage, StageProgress};
use crate::table::Table;

type Pairs = Vec<(String, String)>;

/// Polls every device for sensors, filter speed, water quality, statistics
/// and collections, and writes one table per dataset.
#[derive(Debug)]
pub struct DeviceApiStage {
    ctx: PipelineContext,
    api: Arc<dyn DeviceApiSource>,
}

#[derive(Debug, Default)]
struct Collected {
    sensors: Vec<Pairs>,
    filter_speed: Vec<Pairs>,
    quality: Vec<Pairs>,
    stats: Vec<Pairs>,
    inkas: Vec<Pairs>,
}

impl DeviceApiStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, api: Arc<dyn DeviceApiSource>) -> Self {
        Self { ctx, api }
    }

    async fn pause(&self) {
        let delay = self.ctx.config.api.telemetry_delay_ms;
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(10.0, "📋 Fetching the device list...").await;
        let devices = match self.api.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                return Ok(progress
                    .fail(10.0, format!("Could not fetch the device list: {e}"))
                    .await)
            }
        };
        progress
            .report(20.0, format!("📊 Found {} devices", devices.len()))
            .await;

        let today = self.ctx.clock.today();
        let short = ApiRange::new(
            format!("{} 00:00:00", (today - Duration::days(1)).format("%Y-%m-%d")),
            format!("{} 23:59:59", today.format("%Y-%m-%d")),
        );
        let long = ApiRange::new(
            (today - Duration::days(self.ctx.config.api.quality_days))
                .format("%Y-%m-%d")
                .to_string(),
            today.format("%Y-%m-%d").to_string(),
        );

        let mut collected = Collected::default();
        let total = devices.len();
        for (i, device) in devices.iter().enumerate() {
            let Some(id) = device_id(device) else {
                progress.detail("Device without id skipped").await;
                continue;
            };
            progress
                .report(
                    item_percent(20.0, 60.0, i, total),
                    format!("📊 Device {id} ({}/{total})", i + 1),
                )
                .await;

            let quality = self.api.water_quality(&id, &long).await;
            collect_fixed(&mut collected.quality, &id, quality.as_ref(), &["date", "tds"]);
            self.pause().await;

            let speed = self.api.filter_speed(&id, &short).await;
            collect_fixed(&mut collected.filter_speed, &id, speed.as_ref(), &["date", "speed"]);
            self.pause().await;

            let sensors = self.api.sensors(&id).await;
            collect_fixed(
                &mut collected.sensors,
                &id,
                sensors.as_ref(),
                &["date", "name", "state", "sens_val", "descr"],
            );
            self.pause().await;

            let stats = self.api.water_stats(&id, &short).await;
            collect_open(&mut collected.stats, &id, stats.as_ref());
            self.pause().await;

            let inkas = self.api.device_inkas(&id, &short).await;
            collect_open(&mut collected.inkas, &id, inkas.as_ref());
            self.pause().await;
        }

        progress.report(85.0, "💾 Saving API data...").await;
        self.save(&devices, collected)?;
        progress.report(100.0, "✅ API data collected").await;
        Ok(StageOutcome::Ok)
    }

    fn save(&self, devices: &[Record], collected: Collected) -> Result<()> {
        let data = &self.ctx.data;
        let outputs = [
            (DEVICES, devices.iter().map(record_pairs).collect::<Vec<_>>()),
            (DEVICE_SENSORS, collected.sensors),
            (FILTER_SPEED, collected.filter_speed),
            (WATER_QUALITY, collected.quality),
            (WATER_STATS, collected.stats),
            (DEVICE_INKAS, collected.inkas),
        ];
        for (name, rows) in outputs {
            if !rows.is_empty() {
                Table::from_pairs(rows).write(&data.path(name))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for DeviceApiStage {
    fn label(&self) -> &str {
        "Device API"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

fn record_pairs(record: &Record) -> Pairs {
    record
        .iter()
        .map(|(k, v)| (k.clone(), value_text(Some(v))))
        .collect()
}

fn leading(id: &str, envelope: &ApiEnvelope) -> Pairs {
    vec![
        ("device_id".to_string(), id.to_string()),
        ("address".to_string(), envelope.address().to_string()),
    ]
}

/// Rows with a fixed set of fields after `device_id` and `address`.
fn collect_fixed(out: &mut Vec<Pairs>, id: &str, envelope: Option<&ApiEnvelope>, fields: &[&str]) {
    let Some(envelope) = envelope else { return };
    for item in envelope.records() {
        let mut row = leading(id, envelope);
        row.extend(
            fields
                .iter()
                .map(|f| ((*f).to_string(), value_text(item.get(*f)))),
        );
        out.push(row);
    }
}

/// Rows carrying every field the API returned.
fn collect_open(out: &mut Vec<Pairs>, id: &str, envelope: Option<&ApiEnvelope>) {
    let Some(envelope) = envelope else { return };
    for item in envelope.records() {
        let mut row = leading(id, envelope);
        row.extend(record_pairs(item));
        out.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::{fixture_context, Endpoint, FakeApi};
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_collect_fixed_fills_missing_fields() {
        let envelope =
            ApiEnvelope::success("Зелена 5", vec![record(json!({"date": "2024-01-01"}))]);
        let mut out = Vec::new();
        collect_fixed(&mut out, "7", Some(&envelope), &["date", "tds"]);
        let table = Table::from_pairs(out);
        assert_eq!(table.headers(), ["device_id", "address", "date", "tds"]);
        assert_eq!(table.rows()[0], vec!["7", "Зелена 5", "2024-01-01", ""]);
    }

    #[test]
    fn test_collect_open_keeps_all_fields() {
        let envelope = ApiEnvelope::success("A", vec![record(json!({"sum": 10, "coins": 2}))]);
        let mut out = Vec::new();
        collect_open(&mut out, "1", Some(&envelope));
        collect_open(&mut out, "2", None);
        let table = Table::from_pairs(out);
        assert_eq!(table.len(), 1);
        assert!(table.column("coins").is_some());
    }

    #[tokio::test]
    async fn test_run_writes_one_table_per_dataset() {
        let dir = tempdir().unwrap();
        let api = FakeApi::new()
            .with_device(7, "Зелена 5")
            .with_device(8, "Шевченка 12")
            .with_data(Endpoint::Quality, 7, vec![json!({"date": "2024-03-01", "tds": 55})])
            .with_data(
                Endpoint::Sensors,
                7,
                vec![json!({"date": "2024-03-10 06:00:00", "name": "dv2", "state": 1})],
            )
            .with_data(
                Endpoint::FilterSpeed,
                8,
                vec![json!({"date": "2024-03-09 12:00:00", "speed": "1.2"})],
            );
        let api = Arc::new(api);
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 2, 9, "Device API");

        let outcome = DeviceApiStage::new(fixture_context(dir.path()), api.clone())
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert_eq!(Table::read(&dir.path().join(DEVICES)).unwrap().len(), 2);
        let sensors = Table::read(&dir.path().join(DEVICE_SENSORS)).unwrap();
        assert_eq!(
            sensors.headers(),
            ["device_id", "address", "date", "name", "state", "sens_val", "descr"]
        );
        assert_eq!(sensors.rows()[0][1], "Зелена 5");
        let speed = Table::read(&dir.path().join(FILTER_SPEED)).unwrap();
        assert_eq!(speed.get(0, 0), "8");
        assert!(dir.path().join(WATER_QUALITY).exists());
        assert!(!dir.path().join(WATER_STATS).exists());
        assert_eq!(api.calls().len(), 10);
        assert!(sink.contains("Found 2 devices"));
    }

    #[tokio::test]
    async fn test_run_fails_without_device_list() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 2, 9, "Device API");

        let api = Arc::new(FakeApi::new().failing_devices());

        let outcome = DeviceApiStage::new(fixture_context(dir.path()), api)
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Fail);
        assert!(sink.contains("Could not fetch the device list"));
        assert!(!dir.path().join(DEVICES).exists());
    }
}
