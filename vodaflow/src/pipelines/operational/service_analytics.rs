//! Stage 7: per-apparatus and per-technician service analytics.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{
    APPARATUS_BINDING, SERVICE_ANALYTICS, SERVICE_MONTH, TECHNICIAN_ANALYTICS,
};
use crate::pipelines::{required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{write_records, Table};
use crate::utils::{format_date, parse_address, parse_datetime};

static TECHNICIAN_IN_EVENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ON - (.+)").unwrap());

/// Marker written into `v_doroge` for a technician with no visits that day.
pub const DAY_OFF: &str = "vuxod";

/// One serviced apparatus on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApparatusVisit {
    /// Day.
    pub data: String,
    /// Apparatus as written in the first event.
    pub aparat: String,
    /// First ON time.
    pub start: String,
    /// Technician.
    pub texnik: String,
    /// Last OFF time.
    pub end: String,
    /// Whole minutes between start and end.
    #[serde(rename = "kol-time")]
    pub minutes: i64,
    /// Travel time (not computed here).
    pub v_doroge: String,
    /// Same as `start`.
    pub fir_point: String,
    /// Same as `end`.
    pub last_point: String,
}

/// One technician on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TechnicianDay {
    /// Day.
    pub data: String,
    /// Technician.
    pub texnik: String,
    /// Earliest start.
    pub start: String,
    /// Latest end.
    pub end: String,
    /// Sum of minutes, blank on a day off.
    #[serde(rename = "kol-time")]
    pub minutes: String,
    /// `0`, or [`DAY_OFF`].
    pub v_doroge: String,
    /// Number of apparatus visited, blank on a day off.
    pub point: String,
}

const VISIT_HEADERS: [&str; 9] = [
    "data", "aparat", "start", "texnik", "end", "kol-time", "v_doroge", "fir_point", "last_point",
];
const TECHNICIAN_HEADERS: [&str; 7] =
    ["data", "texnik", "start", "end", "kol-time", "v_doroge", "point"];

/// Derives service visits from the monthly service log.
#[derive(Debug)]
pub struct ServiceAnalyticsStage {
    ctx: PipelineContext,
}

impl ServiceAnalyticsStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "📊 Analysing service data...").await;
        let data = &self.ctx.data;
        if !data.exists(SERVICE_MONTH) {
            let message =
                format!("{SERVICE_MONTH} not found, the service log stage must run first");
            return Ok(progress.fail(0.0, message).await);
        }
        let binding = match Table::read_optional(&data.path(APPARATUS_BINDING))? {
            Some(table) => binding_map(&table),
            None => {
                let message =
                    format!("{APPARATUS_BINDING} not found, technician binding will be incomplete");
                progress.warn(0.0, message).await;
                HashMap::new()
            }
        };

        let service = Table::read(&data.path(SERVICE_MONTH))?;
        progress
            .report(10.0, format!("📝 Loaded {} service records", service.len()))
            .await;

        let visits = apparatus_visits(&service, &binding);
        let technicians = technician_days(&visits);
        write_records(&data.path(SERVICE_ANALYTICS), &visits, &VISIT_HEADERS)?;
        write_records(&data.path(TECHNICIAN_ANALYTICS), &technicians, &TECHNICIAN_HEADERS)?;

        progress
            .report(
                100.0,
                format!(
                    "✅ Analytics built: {} apparatus records, {} technician records",
                    visits.len(),
                    technicians.len()
                ),
            )
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for ServiceAnalyticsStage {
    fn label(&self) -> &str {
        "Service analytics"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

/// Normalized apparatus address to technician, from the binding table.
pub fn binding_map(table: &Table) -> HashMap<String, String> {
    table
        .iter()
        .map(|row| (parse_address(row.get("adress")), row.get("texnik").to_string()))
        .collect()
}

struct Event<'a> {
    at: NaiveDateTime,
    text: &'a str,
    aparat: &'a str,
}

/// Groups events by day and normalized apparatus, pairing the first ON with
/// the last OFF.
pub fn apparatus_visits(
    service: &Table,
    binding: &HashMap<String, String>,
) -> Vec<ApparatusVisit> {
    let mut groups: BTreeMap<(NaiveDate, String), Vec<Event<'_>>> = BTreeMap::new();
    for row in service.iter() {
        let Some(at) = parse_datetime(row.get("Дата")) else {
            continue;
        };
        let aparat = row.get("Апарат");
        groups
            .entry((at.date(), parse_address(aparat)))
            .or_default()
            .push(Event {
                at,
                text: row.get("Подія"),
                aparat,
            });
    }

    let mut visits = Vec::new();
    for ((day, normalized), mut events) in groups {
        events.sort_by_key(|e| e.at);
        let first_on = events.iter().find(|e| e.text.to_uppercase().contains("ON"));
        let last_off = events.iter().rev().find(|e| e.text.to_uppercase().contains("OFF"));
        let (Some(on), Some(off)) = (first_on, last_off) else {
            continue;
        };
        if off.at < on.at {
            continue;
        }
        let mut texnik = TECHNICIAN_IN_EVENT
            .captures(on.text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        if texnik.is_empty() {
            texnik = binding.get(&normalized).cloned().unwrap_or_default();
        }
        let start = on.at.format("%H:%M:%S").to_string();
        let end = off.at.format("%H:%M:%S").to_string();
        visits.push(ApparatusVisit {
            data: format_date(day),
            aparat: events[0].aparat.to_string(),
            start: start.clone(),
            texnik,
            end: end.clone(),
            minutes: (off.at - on.at).num_minutes(),
            v_doroge: String::new(),
            fir_point: start,
            last_point: end,
        });
    }
    visits
}

/// Rolls visits up per day and technician. Every technician seen in the
/// month gets a row for every day; days without visits are marked
/// [`DAY_OFF`].
pub fn technician_days(visits: &[ApparatusVisit]) -> Vec<TechnicianDay> {
    let technicians: BTreeSet<&str> = visits
        .iter()
        .map(|v| v.texnik.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    let days: BTreeSet<&str> = visits.iter().map(|v| v.data.as_str()).collect();

    let mut rows = Vec::new();
    for day in &days {
        for texnik in &technicians {
            let own: Vec<&ApparatusVisit> = visits
                .iter()
                .filter(|v| v.data == *day && v.texnik == *texnik)
                .collect();
            if own.is_empty() {
                rows.push(TechnicianDay {
                    data: (*day).to_string(),
                    texnik: (*texnik).to_string(),
                    start: String::new(),
                    end: String::new(),
                    minutes: String::new(),
                    v_doroge: DAY_OFF.to_string(),
                    point: String::new(),
                });
                continue;
            }
            let start = own.iter().map(|v| v.start.as_str()).min().unwrap_or_default();
            let end = own.iter().map(|v| v.end.as_str()).max().unwrap_or_default();
            rows.push(TechnicianDay {
                data: (*day).to_string(),
                texnik: (*texnik).to_string(),
                start: start.to_string(),
                end: end.to_string(),
                minutes: own.iter().map(|v| v.minutes).sum::<i64>().to_string(),
                v_doroge: "0".to_string(),
                point: own.len().to_string(),
            });
        }
    }
    rows
}
