//! Stage 2: DV3 and DV6 sensor event logs.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{DV3, DV6};
use crate::pipelines::{required, PipelineContext};
use crate::sources::{PortalQuery, PortalSource};
use crate::stages::{Stage, StageProgress};
use crate::table::Table;
use crate::utils::dates::{format_datetime, parse_datetime};
use crate::utils::parse_address;

static MARKERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*\s]+").unwrap());

const LOG_HEADERS: [&str; 2] = ["Дата", "Датчик"];

/// Scrapes the DV3 and DV6 sensor logs.
#[derive(Debug)]
pub struct SensorLogStage {
    ctx: PipelineContext,
    portal: Arc<dyn PortalSource>,
}

impl SensorLogStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, portal: Arc<dyn PortalSource>) -> Self {
        Self { ctx, portal }
    }

    async fn fetch_log(
        &self,
        progress: &StageProgress,
        sensor: &str,
        percent: f64,
    ) -> Option<Table> {
        match self
            .portal
            .fetch_table(&PortalQuery::sensor_log(sensor), &LOG_HEADERS)
            .await
        {
            Ok(Some(page)) => Some(page),
            Ok(None) => {
                progress
                    .warn(percent, format!("{} table not found", sensor.to_uppercase()))
                    .await;
                None
            }
            Err(e) => {
                progress
                    .warn(percent, format!("{} log unavailable: {e}", sensor.to_uppercase()))
                    .await;
                None
            }
        }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(5.0, "🔐 Logging in to the portal...").await;
        if let Err(e) = self.portal.login().await {
            return Ok(progress.fail(5.0, format!("Login failed: {e}")).await);
        }

        progress.report(10.0, "🎛️ Reading the DV3 log...").await;
        if let Some(page) = self.fetch_log(progress, "dv3", 10.0).await {
            let dv3 = dv3_from_page(&page);
            if dv3.is_empty() {
                progress.report(50.0, "✅ DV3: no data").await;
            } else {
                dv3.write(&self.ctx.data.path(DV3))?;
                progress
                    .report(50.0, format!("✅ DV3: saved {} events", dv3.len()))
                    .await;
            }
        }

        progress.report(60.0, "🎛️ Reading the DV6 log...").await;
        if let Some(page) = self.fetch_log(progress, "dv6", 60.0).await {
            let dv6 = dv6_from_page(&page);
            if dv6.is_empty() {
                progress.report(100.0, "✅ DV6: no data").await;
            } else {
                dv6.write(&self.ctx.data.path(DV6))?;
                progress
                    .report(100.0, format!("✅ DV6: saved {} events", dv6.len()))
                    .await;
            }
        }
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for SensorLogStage {
    fn label(&self) -> &str {
        "Sensor logs"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// DV3 rows: timestamp normalized, unparseable rows dropped, sorted by
/// apparatus then time.
pub fn dv3_from_page(page: &Table) -> Table {
    let mut rows: Vec<_> = page
        .rows()
        .iter()
        .filter(|cells| cells.len() >= 5)
        .filter_map(|cells| {
            let raw = MARKERS.replace_all(&cells[0], " ");
            let at = parse_datetime(raw.trim())?;
            Some((
                parse_address(&cells[4]),
                at,
                cells[1].trim().to_string(),
                cells[2].trim().to_string(),
                cells[3].trim().to_string(),
            ))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut out = Table::new(["datetime", "sensor", "state", "value", "apparatus"]);
    for (apparatus, at, sensor, state, value) in rows {
        out.push_row(vec![format_datetime(at), sensor, state, value, apparatus]);
    }
    out
}

/// DV6 rows kept raw apart from the address.
pub fn dv6_from_page(page: &Table) -> Table {
    let mut out = Table::new(["Дата", "Датчик", "Стан", "Апарат"]);
    for cells in page.rows().iter().filter(|c| c.len() >= 5) {
        out.push_row(vec![
            cells[0].trim().to_string(),
            cells[1].trim().to_string(),
            cells[2].trim().to_string(),
            parse_address(&cells[4]),
        ]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::pipelines::files::DV3;
    use crate::testing::{fixture_context, FakePortal};
    use tempfile::tempdir;

    fn page(rows: &[[&str; 5]]) -> Table {
        let mut t = Table::new(["Дата", "Датчик", "Стан", "Значення", "Апарат"]);
        for r in rows {
            t.push_row(r.iter().map(|s| (*s).to_string()).collect());
        }
        t
    }

    #[test]
    fn test_dv3_sorted_and_cleaned() {
        let dv3 = dv3_from_page(&page(&[
            ["2024-03-02 10:00:00", "dv3", "ON", "1", "Б, 2"],
            ["2024-03-01*09:00:00", "dv3", "OFF", "0", "А, 1 магазин"],
            ["garbage", "dv3", "ON", "1", "А, 1"],
            ["2024-03-01 08:00:00", "dv3", "ON", "1", "А, 1"],
        ]));
        assert_eq!(dv3.len(), 3);
        assert_eq!(dv3.get(0, 0), "2024-03-01 08:00:00");
        assert_eq!(dv3.get(1, 0), "2024-03-01 09:00:00");
        assert_eq!(dv3.get(1, 4), "А, 1");
        assert_eq!(dv3.get(2, 4), "Б, 2");
    }

    #[test]
    fn test_dv6_columns() {
        let dv6 = dv6_from_page(&page(&[["2024-03-01 08:00", "dv6", "on", "", "Зелена, 5 АТБ"]]));
        assert_eq!(dv6.headers(), ["Дата", "Датчик", "Стан", "Апарат"]);
        assert_eq!(dv6.get(0, 3), "Зелена, 5");
    }

    #[tokio::test]
    async fn test_run_writes_both_logs() {
        let dir = tempdir().unwrap();
        let portal = FakePortal::new()
            .with_page(
                |q| q.get("sensor") == Some("dv3"),
                page(&[["2024-03-09 08:00:00", "dv3", "ON", "1", "А, 1"]]),
            )
            .with_page(
                |q| q.get("sensor") == Some("dv6"),
                page(&[
                    ["2024-03-09 10:00:00", "dv6", "on", "", "А, 1"],
                    ["2024-03-09 10:05:00", "dv6", "off", "", "А, 1"],
                ]),
            );
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 1, 9, "Sensor logs");

        let outcome = SensorLogStage::new(fixture_context(dir.path()), Arc::new(portal))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert_eq!(Table::read(&dir.path().join(DV3)).unwrap().len(), 1);
        assert_eq!(Table::read(&dir.path().join(DV6)).unwrap().len(), 2);
        assert!(sink.contains("DV6: saved 2 events"));
    }

    #[tokio::test]
    async fn test_run_warns_when_logs_are_missing() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 1, 9, "Sensor logs");

        let outcome = SensorLogStage::new(fixture_context(dir.path()), Arc::new(FakePortal::new()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(sink.contains("DV3 table not found"));
        assert!(!dir.path().join(DV6).exists());
    }
}
