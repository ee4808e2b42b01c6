//! Cash stage 1: collection records from the device API.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::TechnicianRoster;
use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{DEVICE_BINDING, INKAS, INKAS_PROCESSED};
use crate::pipelines::{item_percent, required, PipelineContext};
use crate::sources::api::{device_id, value_text};
use crate::sources::{ApiRange, DeviceApiSource};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_id, Table};

/// Columns of `inkas5w.csv`.
pub const INKAS_COLUMNS: [&str; 8] = [
    "device_id", "address", "date", "card_id", "sum", "banknotes", "coins", "descr",
];

const EMPTY_MARKERS: [&str; 3] = ["nan", "none", "null"];

/// Downloads collection records for the configured number of weeks and
/// normalizes the technician written in `descr`.
#[derive(Debug)]
pub struct CollectStage {
    ctx: PipelineContext,
    api: Arc<dyn DeviceApiSource>,
}

impl CollectStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, api: Arc<dyn DeviceApiSource>) -> Self {
        Self { ctx, api }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "🌐 Requesting the device list...").await;
        let devices = match self.api.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                return Ok(progress
                    .fail(0.0, format!("Could not fetch the device list: {e}"))
                    .await)
            }
        };
        progress
            .report(10.0, format!("📋 Found {} devices", devices.len()))
            .await;

        let today = self.ctx.clock.today();
        let start = today - Duration::weeks(self.ctx.config.api.cash_weeks);
        let range = ApiRange::new(
            format!("{} 00:00:00", start.format("%Y-%m-%d")),
            format!("{} 23:59:59", today.format("%Y-%m-%d")),
        );
        progress
            .report(20.0, format!("📅 Period: {} to {}", range.start, range.end))
            .await;

        let mut inkas = Table::new(INKAS_COLUMNS);
        let total = devices.len();
        let delay = std::time::Duration::from_millis(self.ctx.config.api.cash_delay_ms);
        for (i, device) in devices.iter().enumerate() {
            let Some(id) = device_id(device) else {
                continue;
            };
            progress
                .report(
                    item_percent(20.0, 60.0, i, total),
                    format!("📊 Collections of {id} ({}/{total})", i + 1),
                )
                .await;
            let envelope = self.api.device_inkas(&id, &range).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(envelope) = envelope else {
                continue;
            };
            for record in envelope.records() {
                let mut row = vec![id.clone(), envelope.address().to_string()];
                row.extend(INKAS_COLUMNS[2..].iter().map(|f| value_text(record.get(*f))));
                inkas.push_row(row);
            }
        }

        if inkas.is_empty() {
            return Ok(progress.fail(90.0, "No collection data was collected").await);
        }
        inkas.write(&self.ctx.data.path(INKAS))?;
        progress
            .report(90.0, format!("✅ {INKAS} written with {} records", inkas.len()))
            .await;

        if let Err(e) = self.normalize(progress, inkas).await {
            progress
                .warn(95.0, format!("Technician normalization skipped: {e}"))
                .await;
        }
        progress.report(100.0, "✅ Collection complete").await;
        Ok(StageOutcome::Ok)
    }

    async fn normalize(&self, progress: &StageProgress, mut inkas: Table) -> Result<()> {
        progress.report(92.0, "🔄 Normalizing technician names...").await;
        let binding = match Table::read_optional(&self.ctx.data.path(DEVICE_BINDING))? {
            Some(table) => device_binding(&table),
            None => {
                progress
                    .warn(92.0, format!("{DEVICE_BINDING} not found, technicians not completed"))
                    .await;
                HashMap::new()
            }
        };
        normalize_descr(&mut inkas, &self.ctx.config.technicians, &binding);
        inkas.write(&self.ctx.data.path(INKAS_PROCESSED))?;

        let counts = value_counts(&inkas, "descr");
        let stats = counts
            .iter()
            .map(|(k, v)| format!("{}: {v}", if k.is_empty() { "(empty)" } else { k }))
            .collect::<Vec<_>>()
            .join(", ");
        progress.detail(format!("Technicians: {stats}")).await;
        Ok(())
    }
}

#[async_trait]
impl Stage for CollectStage {
    fn label(&self) -> &str {
        "Collect"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// Device id to lowercase technician, from `privyazka_tex_adres.csv`
/// (`id`, `texnik`).
pub fn device_binding(table: &Table) -> HashMap<i64, String> {
    table
        .iter()
        .filter_map(|row| {
            let id = parse_id(row.get("id"))?;
            Some((id, row.get("texnik").trim().to_lowercase()))
        })
        .collect()
}

/// Canonicalizes `descr`: known aliases become the technician id, anything
/// else is completed from the device binding, and empty markers are
/// blanked.
pub fn normalize_descr(
    inkas: &mut Table,
    roster: &TechnicianRoster,
    binding: &HashMap<i64, String>,
) {
    let descr_col = inkas.ensure_column("descr", "");
    let device_col = inkas.column("device_id");
    let known = roster.ids();
    for row in 0..inkas.len() {
        let raw = inkas.get(row, descr_col).trim().to_string();
        let mut descr = roster
            .match_alias(&raw)
            .map_or_else(|| raw.to_lowercase(), ToString::to_string);
        if !known.contains(&descr.as_str()) {
            let bound = device_col
                .and_then(|c| parse_id(inkas.get(row, c)))
                .and_then(|id| binding.get(&id))
                .filter(|t| !t.is_empty());
            if let Some(tech) = bound {
                descr.clone_from(tech);
            }
        }
        if EMPTY_MARKERS.contains(&descr.as_str()) {
            descr.clear();
        }
        inkas.set(row, descr_col, descr.trim());
    }
}

/// Occurrences of each value of `column`.
pub fn value_counts(table: &Table, column: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in table.iter() {
        *counts.entry(row.get(column).to_string()).or_insert(0) += 1;
    }
    counts
}
