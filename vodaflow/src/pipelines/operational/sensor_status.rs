//! Stage 4: DV1-DV3 working status per device.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{DEVICE_SENSORS, IDADRES};
use crate::pipelines::{item_percent, required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_id, Table};
use crate::utils::parse_date;

/// Status value of a sensor seen today or yesterday.
pub const WORKING: &str = "rabotaet";
/// Status value of a silent sensor.
pub const NOT_WORKING: &str = "nerabotaet";

const SENSORS: [(&str, &str); 3] = [("dv1", "dv1r"), ("dv2", "dv2r"), ("dv3", "dv3r")];

/// Marks each registry device's DV1-DV3 sensors as working or not, based on
/// the latest API sensor reports.
#[derive(Debug)]
pub struct SensorStatusStage {
    ctx: PipelineContext,
}

impl SensorStatusStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress
            .report(0.0, format!("📂 Loading {DEVICE_SENSORS} and {IDADRES}..."))
            .await;
        let data = &self.ctx.data;
        if !data.exists(DEVICE_SENSORS) || !data.exists(IDADRES) {
            return Ok(progress.fail(0.0, "Required input files are missing").await);
        }
        let sensors = Table::read(&data.path(DEVICE_SENSORS))?;
        let mut registry = Table::read(&data.path(IDADRES))?;
        progress
            .report(10.0, format!("📊 Loaded {} sensor records", sensors.len()))
            .await;

        let Some(id_col) = registry.find_column(|h| h.eq_ignore_ascii_case("id")) else {
            return Ok(progress.fail(10.0, format!("No id column in {IDADRES}")).await);
        };

        progress.report(20.0, "📅 Checking sensor dates...").await;
        let today = self.ctx.clock.today();
        let recent = recent_sensors(&sensors, today)?;

        let columns: Vec<usize> = SENSORS
            .iter()
            .map(|(_, col)| registry.ensure_column(col, NOT_WORKING))
            .collect();
        let total = registry.len();
        for row in 0..total {
            let id = registry.get(row, id_col).trim().to_string();
            progress
                .report(
                    item_percent(20.0, 70.0, row, total),
                    format!("🔍 Checking device {id} ({}/{total})", row + 1),
                )
                .await;
            let key = parse_id(&id).map_or(id, |n| n.to_string());
            for ((sensor, _), col) in SENSORS.iter().zip(&columns) {
                let working = recent
                    .get(&key)
                    .is_some_and(|names| names.contains(*sensor));
                registry.set(row, *col, if working { WORKING } else { NOT_WORKING });
            }
        }

        let backup = data.backup(IDADRES, "backup", self.ctx.clock.now())?;
        progress.detail(format!("Backup written to {}", backup.display())).await;
        registry.write(&data.path(IDADRES))?;
        progress
            .report(100.0, format!("✅ Statuses updated for {total} devices"))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for SensorStatusStage {
    fn label(&self) -> &str {
        "Sensor status"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// Device id to the set of lowercase sensor names reported today or
/// yesterday.
pub fn recent_sensors(
    sensors: &Table,
    today: NaiveDate,
) -> Result<HashMap<String, HashSet<String>>> {
    let device_col = sensors.require("device_id", DEVICE_SENSORS)?;
    let name_col = sensors.require("name", DEVICE_SENSORS)?;
    let date_col = sensors.require("date", DEVICE_SENSORS)?;
    let yesterday = today - Duration::days(1);

    let mut recent: HashMap<String, HashSet<String>> = HashMap::new();
    for cells in sensors.rows() {
        let Some(date) = parse_date(&cells[date_col]) else {
            continue;
        };
        if date != today && date != yesterday {
            continue;
        }
        let raw_id = cells[device_col].trim();
        let id = parse_id(raw_id).map_or_else(|| raw_id.to_string(), |n| n.to_string());
        recent
            .entry(id)
            .or_default()
            .insert(cells[name_col].trim().to_lowercase());
    }
    Ok(recent)
}
