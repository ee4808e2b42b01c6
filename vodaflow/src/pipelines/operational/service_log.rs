//! Stage 6: service event log for yesterday and the previous month.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{SERVICE_DAY, SERVICE_MONTH};
use crate::pipelines::{required, PipelineContext};
use crate::sources::{PortalQuery, PortalSource};
use crate::stages::{Stage, StageProgress};
use crate::table::Table;
use crate::utils::previous_month;

/// Header cells identifying the service event table.
pub const SERVICE_HEADERS: [&str; 3] = ["Дата", "Подія", "Апарат"];

/// Downloads service events into `service_day.csv` and `service_mes.csv`.
#[derive(Debug)]
pub struct ServiceLogStage {
    ctx: PipelineContext,
    portal: Arc<dyn PortalSource>,
}

impl ServiceLogStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, portal: Arc<dyn PortalSource>) -> Self {
        Self { ctx, portal }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(5.0, "🔐 Logging in to the portal...").await;
        if let Err(e) = self.portal.login().await {
            return Ok(progress.fail(5.0, format!("Login failed: {e}")).await);
        }

        let today = self.ctx.clock.today();
        let yesterday = today - Duration::days(1);
        progress.report(30.0, "🔄 Requesting service events for the day...").await;
        let day = PortalQuery::service_log(yesterday, yesterday);
        if !self.collect(progress, &day, SERVICE_DAY, 60.0, "day").await? {
            return Ok(StageOutcome::Ok);
        }

        progress.report(70.0, "🔄 Requesting service events for the month...").await;
        let (start, end) = previous_month(today);
        let month = PortalQuery::service_log(start, end);
        self.collect(progress, &month, SERVICE_MONTH, 100.0, "month")
            .await?;
        Ok(StageOutcome::Ok)
    }

    /// Fetches one window. Returns false if the fetch itself failed, after
    /// warning about it.
    async fn collect(
        &self,
        progress: &StageProgress,
        query: &PortalQuery,
        file: &str,
        percent: f64,
        window: &str,
    ) -> Result<bool> {
        let page = match self.portal.fetch_table(query, &SERVICE_HEADERS).await {
            Ok(page) => page,
            Err(e) => {
                progress
                    .warn(percent, format!("Service {window} could not be fetched: {e}"))
                    .await;
                return Ok(false);
            }
        };
        let events = page
            .map(|p| service_events(&p))
            .unwrap_or_else(|| Table::new(SERVICE_HEADERS));
        if events.is_empty() {
            progress
                .report(percent, format!("✅ Service {window}: no records"))
                .await;
        } else {
            events.write(&self.ctx.data.path(file))?;
            progress
                .report(percent, format!("✅ Service {window}: {} records", events.len()))
                .await;
        }
        Ok(true)
    }
}

#[async_trait]
impl Stage for ServiceLogStage {
    fn label(&self) -> &str {
        "Service log"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// Keeps the first three trimmed cells of every row that has at least three.
pub fn service_events(page: &Table) -> Table {
    let mut events = Table::new(SERVICE_HEADERS);
    for cells in page.rows() {
        if cells.len() >= 3 && cells.iter().take(3).any(|c| !c.trim().is_empty()) {
            events.push_row(cells.iter().take(3).map(|c| c.trim().to_string()).collect());
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VodaflowConfig;
    use crate::events::CollectingSink;
    use crate::testing::FakePortal;
    use crate::utils::FixedClock;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn ctx(dir: &std::path::Path) -> PipelineContext {
        let config = VodaflowConfig {
            data_dir: dir.to_path_buf(),
            ..VodaflowConfig::default()
        };
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        PipelineContext::new(Arc::new(config), Arc::new(FixedClock::at_noon(today)))
    }

    fn page() -> Table {
        Table::parse(
            "Дата,Подія,Апарат\n\
             2024-02-03 10:00:00, Service ON - Ivan ,\"Зелена, 5\"\n\
             2024-02-03 10:30:00,Service OFF,\"Зелена, 5\"\n",
        )
        .unwrap()
    }

    #[test]
    fn test_service_events_trims_cells() {
        let events = service_events(&page());
        assert_eq!(events.len(), 2);
        assert_eq!(events.get(0, 1), "Service ON - Ivan");
    }

    #[tokio::test]
    async fn test_writes_month_and_skips_empty_day() {
        let dir = tempdir().unwrap();
        let portal = FakePortal::new()
            .with_page(|q| q.get("date_month_start") == Some("2"), page());
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 5, 9, "Service log");

        let outcome = ServiceLogStage::new(ctx(dir.path()), Arc::new(portal))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(!dir.path().join(SERVICE_DAY).exists());
        assert_eq!(Table::read(&dir.path().join(SERVICE_MONTH)).unwrap().len(), 2);
        assert!(sink.contains("Service day: no records"));
    }

    #[tokio::test]
    async fn test_login_failure_fails_stage() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 5, 9, "Service log");

        let portal = Arc::new(FakePortal::new().rejecting_login());

        let outcome = ServiceLogStage::new(ctx(dir.path()), portal)
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Fail);
        assert!(sink.contains("Login failed"));
    }
}
