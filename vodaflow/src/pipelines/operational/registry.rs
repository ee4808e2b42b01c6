//! Stage 1: device registry with DV2 counters.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::IDADRES;
use crate::pipelines::{required, PipelineContext};
use crate::sources::{PortalQuery, PortalSource};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_id, parse_number, Table};
use crate::utils::{parse_address, previous_month};

/// Registry columns written by this stage.
pub const REGISTRY_COLUMNS: [&str; 5] = ["id", "adress", "dv2day", "dv2week", "dv2moun"];

/// Scrapes the id/address registry and the DV2 off-counters for the last
/// day, the last week and the previous month.
#[derive(Debug)]
pub struct DeviceRegistryStage {
    ctx: PipelineContext,
    portal: Arc<dyn PortalSource>,
}

impl DeviceRegistryStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, portal: Arc<dyn PortalSource>) -> Self {
        Self { ctx, portal }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(5.0, "🔐 Logging in to the portal...").await;
        if let Err(e) = self.portal.login().await {
            return Ok(progress.fail(5.0, format!("Login failed: {e}")).await);
        }
        progress.report(10.0, "✅ Logged in").await;

        progress.report(15.0, "📊 Collecting ids and addresses...").await;
        let Some(page) = self
            .portal
            .fetch_table(&PortalQuery::registry(), &["ID", "Адреса"])
            .await?
        else {
            return Ok(progress.warn(15.0, "Registry table not found, stage skipped").await);
        };

        let mut registry = registry_from_page(&page);
        if registry.is_empty() {
            return Ok(progress.warn(20.0, "No devices found in the registry").await);
        }
        let path = self.ctx.data.path(IDADRES);
        registry.write(&path)?;
        progress
            .report(20.0, format!("✅ Collected {} devices", registry.len()))
            .await;

        let today = self.ctx.clock.today();
        let (month_start, month_end) = previous_month(today);
        let windows = [
            ("dv2day", today - Duration::days(1), today, 30.0, "day"),
            ("dv2week", today - Duration::days(7), today, 50.0, "week"),
            ("dv2moun", month_start, month_end, 70.0, "month"),
        ];
        for (column, start, end, percent, name) in windows {
            progress
                .report(percent, format!("📅 Collecting DV2 counters for the {name}..."))
                .await;
            let query = PortalQuery::device_log(start, end);
            match self.portal.fetch_table(&query, &["DV2"]).await {
                Ok(Some(page)) => {
                    let updated = merge_dv2(&mut registry, column, &page);
                    progress
                        .detail(format!("DV2 {name}: {updated} devices updated"))
                        .await;
                }
                Ok(None) => {
                    progress
                        .warn(percent, format!("DV2 table for the {name} not found"))
                        .await;
                }
                Err(e) => {
                    progress
                        .warn(percent, format!("DV2 collection for the {name} failed: {e}"))
                        .await;
                }
            }
            registry.write(&path)?;
        }

        progress.report(100.0, "✅ Device registry complete").await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for DeviceRegistryStage {
    fn label(&self) -> &str {
        "Device registry"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// Builds the registry from the portal's id/address table. Rows whose id
/// has no digit (filter and total rows) are skipped.
pub fn registry_from_page(page: &Table) -> Table {
    let mut registry = Table::new(REGISTRY_COLUMNS);
    for row in page.iter() {
        let id_text = row.cell(0).trim();
        if !id_text.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        let id = parse_id(id_text).map_or_else(|| id_text.to_string(), |n| n.to_string());
        registry.push_row(vec![id, parse_address(row.cell(1))]);
    }
    registry
}

/// Copies non-zero DV2 off-counters (sixth cell) into `column` by id.
/// Returns the number of devices updated.
pub fn merge_dv2(registry: &mut Table, column: &str, page: &Table) -> usize {
    let updates: HashMap<i64, String> = page
        .rows()
        .iter()
        .filter(|cells| cells.len() >= 6)
        .filter_map(|cells| {
            let id = parse_id(&cells[0])?;
            let value = cells[5].trim();
            let number = parse_number(value)?;
            (number != 0.0).then(|| (id, value.to_string()))
        })
        .collect();

    let col = registry.ensure_column(column, "");
    let mut updated = 0;
    for row in 0..registry.len() {
        if let Some(value) = parse_id(registry.get(row, 0)).and_then(|id| updates.get(&id)) {
            registry.set(row, col, value.clone());
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::{fixture_context, FakePortal};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn page(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut t = Table::new(headers.iter().copied());
        for r in rows {
            t.push_row(r.iter().map(|s| (*s).to_string()).collect());
        }
        t
    }

    #[test]
    fn test_registry_skips_non_id_rows() {
        let source = page(
            &["ID", "Адреса"],
            &[
                &["", "filter"],
                &["101", "Шевченка, 12а біля АТБ"],
                &["Всього", "3"],
                &["102", "Зелена 5"],
            ],
        );
        let registry = registry_from_page(&source);
        assert_eq!(registry.headers(), REGISTRY_COLUMNS);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(0, 1), "Шевченка, 12а");
        assert_eq!(registry.get(1, 0), "102");
    }

    #[test]
    fn test_merge_dv2_ignores_zero_and_garbage() {
        let mut registry = registry_from_page(&page(
            &["ID", "Адреса"],
            &[&["101", "A"], &["102", "B"], &["103", "C"]],
        ));
        let dv2 = page(
            &["ID", "a", "b", "c", "d", "DV2 off"],
            &[
                &["101", "", "", "", "", "12,5"],
                &["102", "", "", "", "", "0"],
                &["103", "", "", "", "", "n/a"],
                &["104", "", "", "", "", "7"],
            ],
        );

        let updated = merge_dv2(&mut registry, "dv2week", &dv2);

        assert_eq!(updated, 1);
        let col = registry.column("dv2week").unwrap();
        assert_eq!(registry.get(0, col), "12,5");
        assert_eq!(registry.get(1, col), "");
    }

    #[tokio::test]
    async fn test_run_writes_registry_with_counters() {
        let dir = tempdir().unwrap();
        let portal = FakePortal::new()
            .with_page(
                |q| q.params().len() == 1,
                page(&["ID", "Адреса"], &[&["101", "Зелена, 5"], &["Всього", "1"]]),
            )
            .with_page(
                |q| q.get("date_day_start") == Some("9"),
                page(&["ID", "a", "b", "c", "d", "DV2"], &[&["101", "", "", "", "", "3"]]),
            );
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 9, "Device registry");

        let outcome = DeviceRegistryStage::new(fixture_context(dir.path()), Arc::new(portal))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        let registry = Table::read(&dir.path().join(IDADRES)).unwrap();
        let rows: Vec<_> = registry.iter().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("dv2day"), "3");
        assert_eq!(rows[0].get("dv2week"), "");
        assert!(sink.contains("DV2 table for the week not found"));
        assert!(sink.contains("Device registry complete"));
    }

    #[tokio::test]
    async fn test_run_fails_on_fatal_portal_page() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 0, 9, "Device registry");
        let portal = Arc::new(FakePortal::new().failing_fetch());

        let outcome = DeviceRegistryStage::new(fixture_context(dir.path()), portal.clone())
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Fail);
        assert!(sink.contains("fatal error page"));
        assert_eq!(portal.queries(), vec![PortalQuery::registry()]);
        assert!(!dir.path().join(IDADRES).exists());
    }
}
