//! Service stage 3: per technician and day working-time rollup.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::StageOutcome;
use crate::errors::{Result, VodaflowError};
use crate::pipelines::files::{MONTHLY_ROLLUP, MONTHLY_ROLLUP_DETAILED, SERVICE_MONTH};
use crate::pipelines::{best_effort, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{write_records, Table};
use crate::utils::{format_date, format_datetime, format_time};

use super::visits::{pair_visits, read_events, Visit};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::cast_precision_loss)]
fn visit_minutes(visit: &Visit) -> f64 {
    (visit.end - visit.start).num_seconds() as f64 / 60.0
}

/// A row of `texnik_za_mesyac.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRollup {
    /// Day.
    #[serde(rename = "Дата")]
    pub date: String,
    /// Technician.
    #[serde(rename = "Техник")]
    pub tech: String,
    /// First arrival.
    #[serde(rename = "Первый раз")]
    pub first: String,
    /// Last departure.
    #[serde(rename = "Последний раз")]
    pub last: String,
    /// Minutes spent at apparatus.
    #[serde(rename = "Работал за день (мин)")]
    pub minutes: f64,
    /// Distinct apparatus visited.
    #[serde(rename = "Количество аппаратов")]
    pub apparatus: usize,
}

/// A row of `texnik_za_mesyac_detailed.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitDetail {
    /// Day.
    #[serde(rename = "Дата")]
    pub date: String,
    /// Technician.
    #[serde(rename = "Техник")]
    pub tech: String,
    /// Apparatus.
    #[serde(rename = "Апарат")]
    pub aparat: String,
    /// ON time.
    #[serde(rename = "Время начала")]
    pub start: String,
    /// OFF time.
    #[serde(rename = "Время окончания")]
    pub end: String,
    /// Visit length in minutes.
    #[serde(rename = "Продолжительность (мин)")]
    pub minutes: f64,
}

impl From<&Visit> for VisitDetail {
    fn from(visit: &Visit) -> Self {
        Self {
            date: format_date(visit.day()),
            tech: visit.tech.clone(),
            aparat: visit.aparat.clone(),
            start: format_datetime(visit.start),
            end: format_datetime(visit.end),
            minutes: round2(visit_minutes(visit)),
        }
    }
}

/// Totals of one technician over the whole period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicianTotals {
    /// Days with at least one visit.
    pub days: usize,
    /// Minutes spent at apparatus.
    pub minutes: f64,
    /// Apparatus visits, counted once per day.
    pub apparatus: usize,
}

impl TechnicianTotals {
    /// Average working minutes per day.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn minutes_per_day(&self) -> f64 {
        if self.days == 0 {
            0.0
        } else {
            self.minutes / self.days as f64
        }
    }
}

/// Rolls named visits up per (day, technician), sorted by day then name.
pub fn daily_rollup(visits: &[Visit]) -> Vec<DailyRollup> {
    struct Acc<'a> {
        first: NaiveDateTime,
        last: NaiveDateTime,
        minutes: f64,
        apparatus: BTreeSet<&'a str>,
    }

    let mut groups: BTreeMap<(NaiveDate, &str), Acc<'_>> = BTreeMap::new();
    for visit in visits.iter().filter(|v| !v.tech.is_empty()) {
        let acc = groups
            .entry((visit.day(), visit.tech.as_str()))
            .or_insert_with(|| Acc {
                first: visit.start,
                last: visit.end,
                minutes: 0.0,
                apparatus: BTreeSet::new(),
            });
        acc.first = acc.first.min(visit.start);
        acc.last = acc.last.max(visit.end);
        acc.minutes += visit_minutes(visit);
        acc.apparatus.insert(&visit.aparat);
    }
    groups
        .into_iter()
        .map(|((day, tech), acc)| DailyRollup {
            date: format_date(day),
            tech: tech.to_string(),
            first: format_time(acc.first.time()),
            last: format_time(acc.last.time()),
            minutes: round2(acc.minutes),
            apparatus: acc.apparatus.len(),
        })
        .collect()
}

/// Sums the daily rollup per technician.
pub fn technician_totals(rollup: &[DailyRollup]) -> BTreeMap<String, TechnicianTotals> {
    let mut totals: BTreeMap<String, TechnicianTotals> = BTreeMap::new();
    for day in rollup {
        let entry = totals.entry(day.tech.clone()).or_default();
        entry.days += 1;
        entry.minutes += day.minutes;
        entry.apparatus += day.apparatus;
    }
    totals
}

/// Monthly working-time statistics. Never stops the pipeline.
#[derive(Debug)]
pub struct RollupStage {
    ctx: PipelineContext,
}

impl RollupStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "📊 Monthly technician rollup...").await;
        let data = &self.ctx.data;
        if !data.exists(SERVICE_MONTH) {
            return Err(VodaflowError::missing(data.path(SERVICE_MONTH)));
        }
        let events = read_events(&Table::read(&data.path(SERVICE_MONTH))?);
        let visits: Vec<Visit> = pair_visits(&events)
            .into_iter()
            .filter(|v| !v.tech.is_empty())
            .collect();
        if visits.is_empty() {
            return Ok(progress.warn(100.0, "No Service ON/OFF pairs with a technician").await);
        }

        let rollup = daily_rollup(&visits);
        write_records(&data.path(MONTHLY_ROLLUP), &rollup, &[])?;
        let details: Vec<VisitDetail> = visits.iter().map(VisitDetail::from).collect();
        write_records(&data.path(MONTHLY_ROLLUP_DETAILED), &details, &[])?;
        progress.report(60.0, format!("✅ {} technician-days written", rollup.len())).await;

        for day in &rollup {
            progress
                .detail(format!(
                    "{} {}: {} to {}, {:.2} min, {} apparatus",
                    day.date, day.tech, day.first, day.last, day.minutes, day.apparatus
                ))
                .await;
        }
        for (tech, totals) in technician_totals(&rollup) {
            progress
                .detail(format!(
                    "👷 {tech}: {} days, {:.2} min ({:.2} h), {} apparatus, {:.2} min/day",
                    totals.days,
                    totals.minutes,
                    totals.minutes / 60.0,
                    totals.apparatus,
                    totals.minutes_per_day()
                ))
                .await;
        }
        progress.report(100.0, "✅ Rollup complete").await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for RollupStage {
    fn label(&self) -> &str {
        "Monthly rollup"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        best_effort(progress, self.execute(progress).await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::{fixture_context, write_fixture};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    const LOG: &str = "Дата,Подія,Апарат\n\
                       2024-02-03 09:00:00,Service ON - Ivan,Зелена 5\n\
                       2024-02-03 09:20:30,Service OFF,Зелена 5\n\
                       2024-02-03 10:00:00,Service ON - Ivan,Лесі 1\n\
                       2024-02-03 10:45:00,Service OFF,Лесі 1\n\
                       2024-02-03 12:00:00,Service ON - Ivan,Зелена 5\n\
                       2024-02-03 12:10:00,Service OFF,Зелена 5\n\
                       2024-02-04 08:00:00,Service ON,Шевченка 12\n\
                       2024-02-04 08:10:00,Service OFF,Шевченка 12\n";

    fn visits() -> Vec<Visit> {
        pair_visits(&read_events(&Table::parse(LOG).unwrap()))
    }

    #[test]
    fn test_daily_rollup_skips_anonymous_visits() {
        let rollup = daily_rollup(&visits());

        assert_eq!(
            rollup,
            vec![DailyRollup {
                date: "2024-02-03".to_string(),
                tech: "Ivan".to_string(),
                first: "09:00:00".to_string(),
                last: "12:10:00".to_string(),
                minutes: 75.5,
                apparatus: 2,
            }]
        );
    }

    #[test]
    fn test_totals_average() {
        let rollup = daily_rollup(&visits());
        let totals = technician_totals(&rollup);
        assert_eq!(totals["Ivan"].days, 1);
        assert!((totals["Ivan"].minutes_per_day() - 75.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stage_writes_both_files() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), SERVICE_MONTH, LOG).unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 2, 3, "Monthly rollup");

        let outcome = RollupStage::new(fixture_context(dir.path()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        let detailed = Table::read(&dir.path().join(MONTHLY_ROLLUP_DETAILED)).unwrap();
        assert_eq!(detailed.len(), 3);
        assert_eq!(detailed.headers()[0], "Дата");
        assert!(dir.path().join(MONTHLY_ROLLUP).is_file());
    }

    #[tokio::test]
    async fn test_missing_input_is_only_a_warning() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 2, 3, "Monthly rollup");

        let outcome = RollupStage::new(fixture_context(dir.path()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(sink.contains("⚠️ Missing input file"));
    }
}
