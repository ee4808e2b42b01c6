//! Cash stage 2: technician per collection.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::TechnicianRoster;
use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{APPARATUS_BINDING, INKAS, INKAS_LINKED, INKAS_PROCESSED};
use crate::pipelines::{required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_id, Table};

use super::collect::value_counts;

/// Assigns every collection to a technician, first by card, then by the
/// apparatus binding file.
#[derive(Debug)]
pub struct LinkStage {
    ctx: PipelineContext,
}

impl LinkStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        let data = &self.ctx.data;
        let source = if data.exists(INKAS_PROCESSED) { INKAS_PROCESSED } else { INKAS };
        if !data.exists(source) {
            return Ok(progress.fail(0.0, format!("{INKAS} not found")).await);
        }
        let mut inkas = Table::read(&data.path(source))?;
        progress
            .report(10.0, format!("✅ Loaded {} records from {source}", inkas.len()))
            .await;

        let binding = match Table::read_optional(&data.path(APPARATUS_BINDING))? {
            Some(table) => {
                let binding = apparatus_binding(&table);
                progress
                    .detail(format!("{} device bindings loaded", binding.len()))
                    .await;
                binding
            }
            None => {
                progress
                    .warn(30.0, format!("{APPARATUS_BINDING} not found"))
                    .await;
                HashMap::new()
            }
        };

        progress.report(50.0, "🔧 Linking technicians...").await;
        let by_card = link_technicians(&mut inkas, &self.ctx.config.technicians, &binding);
        progress
            .detail(format!("{by_card} records linked by card"))
            .await;
        inkas.write(&data.path(INKAS_LINKED))?;

        let counts = value_counts(&inkas, "tech");
        let unassigned = counts.get("").copied().unwrap_or(0);
        for (tech, count) in counts.iter().filter(|(t, _)| !t.is_empty()) {
            progress.detail(format!("{tech}: {count} records")).await;
        }
        if unassigned > 0 {
            progress
                .report(95.0, format!("⚠️ Unassigned: {unassigned} records"))
                .await;
        }
        progress
            .report(100.0, format!("✅ {INKAS_LINKED} written"))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for LinkStage {
    fn label(&self) -> &str {
        "Link technicians"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

fn id_key(raw: &str) -> String {
    let raw = raw.trim();
    parse_id(raw).map_or_else(|| raw.to_string(), |n| n.to_string())
}

/// Device id to lowercase technician: first column to last column of the
/// binding file.
pub fn apparatus_binding(table: &Table) -> HashMap<String, String> {
    table
        .iter()
        .filter(|row| !row.first().trim().is_empty())
        .map(|row| (id_key(row.first()), row.last().trim().to_lowercase()))
        .collect()
}

/// Fills a `tech` column and overwrites `descr` where a technician was
/// found. Returns how many records were linked by card.
pub fn link_technicians(
    inkas: &mut Table,
    roster: &TechnicianRoster,
    binding: &HashMap<String, String>,
) -> usize {
    let tech_col = inkas.ensure_column("tech", "");
    let descr_col = inkas.ensure_column("descr", "");
    let card_col = inkas.column("card_id");
    let device_col = inkas.column("device_id");
    let mut by_card = 0;
    for row in 0..inkas.len() {
        let card = card_col.map(|c| id_key(inkas.get(row, c))).unwrap_or_default();
        let tech = if let Some(tech) = roster.by_card(&card) {
            by_card += 1;
            tech.to_string()
        } else {
            device_col
                .and_then(|c| binding.get(&id_key(inkas.get(row, c))))
                .cloned()
                .unwrap_or_default()
        };
        if !tech.is_empty() {
            inkas.set(row, descr_col, tech.clone());
        }
        inkas.set(row, tech_col, tech);
    }
    by_card
}
