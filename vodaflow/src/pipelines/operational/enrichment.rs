//! Stages 8 and 9: filter speed and TDS columns in the registry.
//!
//! Both stages are best effort. Missing inputs and unreadable data produce
//! a warning and the pipeline carries on.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{FILTER_SPEED, IDADRES, WATER_QUALITY};
use crate::pipelines::{best_effort, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_id, parse_number, Table};
use crate::utils::{format_date, parse_datetime};

/// Placeholder for a device without water quality samples.
pub const NO_DATA: &str = "no data";

/// Filter speed statistics of one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedStats {
    /// Mean speed.
    pub mean: f64,
    /// Speed of the newest sample.
    pub latest: f64,
}

impl SpeedStats {
    /// `mean - latest`.
    #[must_use]
    pub fn drift(&self) -> f64 {
        self.mean - self.latest
    }
}

fn round2(value: f64) -> String {
    ((value * 100.0).round() / 100.0).to_string()
}

/// Replaces `columns` in the registry with values looked up by numeric id.
/// Unknown ids get `fallback`.
fn merge_by_id(
    registry: &mut Table,
    columns: &[&str],
    values: &HashMap<i64, Vec<String>>,
    fallback: &str,
) -> usize {
    for column in columns {
        registry.drop_column(column);
    }
    let indices: Vec<usize> = columns
        .iter()
        .map(|c| registry.ensure_column(c, fallback))
        .collect();
    let id_col = registry.column("id");
    let mut matched = 0;
    for row in 0..registry.len() {
        let found = id_col
            .and_then(|c| parse_id(registry.get(row, c)))
            .and_then(|id| values.get(&id))
            .cloned();
        if let Some(found) = found {
            matched += 1;
            for (col, value) in indices.iter().zip(found) {
                registry.set(row, *col, value);
            }
        }
    }
    matched
}

/// Adds mean/latest filter speed columns to the registry.
#[derive(Debug)]
pub struct FilterSpeedStage {
    ctx: PipelineContext,
}

impl FilterSpeedStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "📊 Processing filter speed data...").await;
        let data = &self.ctx.data;
        if !data.exists(FILTER_SPEED) || !data.exists(IDADRES) {
            return Ok(progress.warn(0.0, "Required input files are missing").await);
        }
        let samples = Table::read(&data.path(FILTER_SPEED))?;
        progress
            .report(10.0, format!("📋 Loaded {} speed records", samples.len()))
            .await;

        progress.report(30.0, "🔢 Computing statistics...").await;
        let stats = speed_stats(&samples);

        progress.report(60.0, "🔗 Merging into the registry...").await;
        let values: HashMap<i64, Vec<String>> = stats
            .iter()
            .map(|(id, s)| (*id, vec![round2(s.mean), round2(s.latest), round2(s.drift())]))
            .collect();
        let mut registry = Table::read(&data.path(IDADRES))?;
        merge_by_id(&mut registry, &["Sred", "posl_znach", "pokazat.skoros"], &values, "");
        registry.write(&data.path(IDADRES))?;

        progress
            .report(100.0, format!("✅ Filter speed processed for {} devices", stats.len()))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for FilterSpeedStage {
    fn label(&self) -> &str {
        "Filter speed"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        best_effort(progress, self.execute(progress).await).await
    }
}

/// Mean and newest speed per device. Samples without a readable date or
/// speed are ignored.
pub fn speed_stats(samples: &Table) -> BTreeMap<i64, SpeedStats> {
    let mut grouped: BTreeMap<i64, Vec<(NaiveDateTime, f64)>> = BTreeMap::new();
    for row in samples.iter() {
        let (Some(id), Some(at), Some(speed)) = (
            parse_id(row.get("device_id")),
            parse_datetime(row.get("date")),
            parse_number(row.get("speed")),
        ) else {
            continue;
        };
        grouped.entry(id).or_default().push((at, speed));
    }
    grouped
        .into_iter()
        .filter_map(|(id, points)| {
            let latest = points.iter().max_by_key(|(at, _)| *at)?.1;
            #[allow(clippy::cast_precision_loss)]
            let mean = points.iter().map(|(_, s)| s).sum::<f64>() / points.len() as f64;
            Some((id, SpeedStats { mean, latest }))
        })
        .collect()
}

/// Adds the latest TDS reading and its date to the registry.
#[derive(Debug)]
pub struct TdsStage {
    ctx: PipelineContext,
}

impl TdsStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "💧 Adding TDS data...").await;
        let data = &self.ctx.data;
        if !data.exists(WATER_QUALITY) || !data.exists(IDADRES) {
            return Ok(progress.warn(0.0, "Required input files are missing").await);
        }
        let samples = Table::read(&data.path(WATER_QUALITY))?;
        progress
            .report(10.0, format!("📋 Loaded {} water quality records", samples.len()))
            .await;

        progress.report(30.0, "🔍 Finding the latest TDS readings...").await;
        let latest = latest_tds(&samples);

        progress.report(60.0, "🔗 Merging into the registry...").await;
        let mut registry = Table::read(&data.path(IDADRES))?;
        let updated = merge_by_id(&mut registry, &["TDS", "TDSdata"], &latest, NO_DATA);

        progress.report(70.0, "💾 Saving results...").await;
        data.backup(IDADRES, "backup_tds", self.ctx.clock.now())?;
        registry.write(&data.path(IDADRES))?;

        progress
            .report(100.0, format!("✅ TDS updated for {updated} devices"))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for TdsStage {
    fn label(&self) -> &str {
        "TDS"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        best_effort(progress, self.execute(progress).await).await
    }
}

/// Latest sample per device as `[TDS, TDSdata]`. A sample with an
/// unreadable value or date keeps [`NO_DATA`] in that cell.
pub fn latest_tds(samples: &Table) -> HashMap<i64, Vec<String>> {
    let mut latest: HashMap<i64, (Option<NaiveDateTime>, String)> = HashMap::new();
    for row in samples.iter() {
        let Some(id) = parse_id(row.get("device_id")) else {
            continue;
        };
        let at = parse_datetime(row.get("date"));
        let newer = latest.get(&id).map_or(true, |(seen, _)| at >= *seen);
        if newer {
            latest.insert(id, (at, row.get("tds").to_string()));
        }
    }
    latest
        .into_iter()
        .map(|(id, (at, tds))| {
            #[allow(clippy::cast_possible_truncation)]
            let tds = parse_number(&tds)
                .map_or_else(|| NO_DATA.to_string(), |v| (v.trunc() as i64).to_string());
            let date = at.map_or_else(|| NO_DATA.to_string(), |at| format_date(at.date()));
            (id, vec![tds, date])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VodaflowConfig;
    use crate::events::CollectingSink;
    use crate::utils::FixedClock;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn ctx(dir: &std::path::Path) -> PipelineContext {
        let config = VodaflowConfig {
            data_dir: dir.to_path_buf(),
            ..VodaflowConfig::default()
        };
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        PipelineContext::new(Arc::new(config), Arc::new(FixedClock::at_noon(today)))
    }

    #[test]
    fn test_speed_stats_mean_latest_drift() {
        let samples = Table::parse(
            "device_id,address,date,speed\n\
             7,A,2024-03-09 10:00:00,10\n\
             7,A,2024-03-10 10:00:00,4\n\
             7,A,2024-03-08 10:00:00,7\n\
             7,A,bad,100\n\
             8,B,2024-03-10 10:00:00,n/a\n",
        )
        .unwrap();
        let stats = speed_stats(&samples);
        assert_eq!(stats.len(), 1);
        let s = stats[&7];
        assert!((s.mean - 7.0).abs() < 1e-9);
        assert!((s.latest - 4.0).abs() < 1e-9);
        assert_eq!(round2(s.drift()), "3");
    }

    #[test]
    fn test_latest_tds_truncates_and_marks_missing() {
        let samples = Table::parse(
            "device_id,date,tds\n\
             1,2024-03-01 08:00:00,55.9\n\
             1,2024-03-05 08:00:00,61.2\n\
             2,2024-03-05 08:00:00,\n",
        )
        .unwrap();
        let latest = latest_tds(&samples);
        assert_eq!(latest[&1], vec!["61".to_string(), "2024-03-05".to_string()]);
        assert_eq!(latest[&2][0], NO_DATA);
    }

    #[tokio::test]
    async fn test_tds_stage_fills_unknown_devices() {
        let dir = tempdir().unwrap();
        let ctx = ctx(dir.path());
        Table::parse("id,adress,TDS\n1,A,old\n3,C,old\n")
            .unwrap()
            .write(&ctx.data.path(IDADRES))
            .unwrap();
        Table::parse("device_id,date,tds\n1,2024-03-05 08:00:00,61\n")
            .unwrap()
            .write(&ctx.data.path(WATER_QUALITY))
            .unwrap();
        let progress = StageProgress::new(Arc::new(CollectingSink::new()), 8, 9, "TDS");

        let outcome = TdsStage::new(ctx.clone()).run(&progress).await.unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        let registry = Table::read(&ctx.data.path(IDADRES)).unwrap();
        let rows: Vec<_> = registry.iter().collect();
        assert_eq!(rows[0].get("TDS"), "61");
        assert_eq!(rows[1].get("TDS"), NO_DATA);
        assert_eq!(rows[1].get("TDSdata"), NO_DATA);
    }

    #[tokio::test]
    async fn test_missing_files_only_warn() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 7, 9, "Filter speed");

        let outcome = FilterSpeedStage::new(ctx(dir.path())).run(&progress).await.unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(sink.contains("⚠️ Required input files are missing"));
    }

    #[tokio::test]
    async fn test_broken_speed_file_is_a_warning() {
        let dir = tempdir().unwrap();
        let ctx = ctx(dir.path());
        std::fs::write(ctx.data.path(FILTER_SPEED), "device_id,date\n1,2024-03-01\n").unwrap();
        std::fs::write(ctx.data.path(IDADRES), "id\n1\n").unwrap();
        let progress = StageProgress::new(Arc::new(CollectingSink::new()), 7, 9, "Filter speed");

        let outcome = FilterSpeedStage::new(ctx).run(&progress).await.unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
    }
}
