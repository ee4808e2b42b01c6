//! Service stage 1: visit intervals from the raw service log.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{SERVICE_MONTH, SERVICE_VISITS};
use crate::pipelines::{required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{write_records, Table};
use crate::utils::{clean_datetime, format_date, format_time};

static TECHNICIAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Service ON - (.+)").unwrap());

/// Marker of a technician's first and last visit of a day.
pub const MARK: &str = "YES";

/// Columns of `service_tex_analitik.csv`.
pub const VISIT_COLUMNS: [&str; 9] = [
    "data", "aparat", "start", "tech", "end", "kol-time", "v_doroge", "fir_point", "last_point",
];

/// One raw service event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    /// When it happened.
    pub at: NaiveDateTime,
    /// Event text (`Service ON - name`, `Service OFF`).
    pub text: String,
    /// Apparatus as written by the portal.
    pub aparat: String,
}

/// One ON/OFF interval at one apparatus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    /// Apparatus.
    pub aparat: String,
    /// Technician named in the ON event; empty if none.
    pub tech: String,
    /// ON time.
    pub start: NaiveDateTime,
    /// OFF time.
    pub end: NaiveDateTime,
}

impl Visit {
    /// Day the visit started.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.start.date()
    }

    /// Whole minutes between ON and OFF.
    #[must_use]
    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// A row of `service_tex_analitik.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitRow {
    /// Day.
    pub data: String,
    /// Apparatus.
    pub aparat: String,
    /// ON time of day.
    pub start: String,
    /// Technician.
    pub tech: String,
    /// OFF time of day.
    pub end: String,
    /// Visit length in whole minutes.
    #[serde(rename = "kol-time")]
    pub minutes: i64,
    /// Minutes since the technician's previous visit ended.
    pub v_doroge: i64,
    /// [`MARK`] on the first visit of a technician-day.
    pub fir_point: String,
    /// [`MARK`] on the last visit of a technician-day.
    pub last_point: String,
}

/// Reads the service log. The file may or may not carry a header row; only
/// the first three columns (time, event, apparatus) are used.
pub fn read_events(table: &Table) -> Vec<ServiceEvent> {
    let header = table.headers().to_vec();
    let header_is_data = header.first().and_then(|h| clean_datetime(h)).is_some();
    let rows = header_is_data
        .then_some(&header)
        .into_iter()
        .chain(table.rows().iter());
    rows.filter(|cells| cells.len() >= 3)
        .filter_map(|cells| {
            Some(ServiceEvent {
                at: clean_datetime(&cells[0])?,
                text: cells[1].clone(),
                aparat: cells[2].trim().to_string(),
            })
        })
        .collect()
}

/// Pairs each `Service OFF` with the preceding `Service ON` at the same
/// apparatus.
pub fn pair_visits(events: &[ServiceEvent]) -> Vec<Visit> {
    let mut by_aparat: BTreeMap<&str, Vec<&ServiceEvent>> = BTreeMap::new();
    for event in events {
        by_aparat.entry(event.aparat.as_str()).or_default().push(event);
    }
    let mut visits = Vec::new();
    for (aparat, mut group) in by_aparat {
        group.sort_by_key(|e| e.at);
        let mut open: Option<(NaiveDateTime, String)> = None;
        for event in group {
            if event.text.contains("Service ON") {
                let tech = TECHNICIAN
                    .captures(&event.text)
                    .map(|c| c[1].trim().to_string())
                    .unwrap_or_default();
                open = Some((event.at, tech));
            } else if event.text.contains("Service OFF") {
                if let Some((start, tech)) = open.take() {
                    visits.push(Visit {
                        aparat: aparat.to_string(),
                        tech,
                        start,
                        end: event.at,
                    });
                }
            }
        }
    }
    visits
}

/// Orders visits by day, technician and start, then fills travel time and
/// first/last markers. Visits without a technician get neither.
pub fn visit_rows(mut visits: Vec<Visit>) -> Vec<VisitRow> {
    visits.sort_by(|a, b| (a.day(), &a.tech, a.start).cmp(&(b.day(), &b.tech, b.start)));

    let mut previous_end: BTreeMap<&str, NaiveDateTime> = BTreeMap::new();
    let mut travel = vec![0; visits.len()];
    let mut order: Vec<usize> = (0..visits.len()).collect();
    order.sort_by(|&a, &b| {
        (&visits[a].tech, visits[a].start).cmp(&(&visits[b].tech, visits[b].start))
    });
    for i in order {
        let visit = &visits[i];
        if visit.tech.is_empty() {
            continue;
        }
        if let Some(end) = previous_end.get(visit.tech.as_str()) {
            travel[i] = (visit.start - *end).num_minutes();
        }
        previous_end.insert(visit.tech.as_str(), visit.end);
    }

    let mut rows: Vec<VisitRow> = visits
        .iter()
        .zip(travel)
        .map(|(v, v_doroge)| VisitRow {
            data: format_date(v.day()),
            aparat: v.aparat.clone(),
            start: format_time(v.start.time()),
            tech: v.tech.clone(),
            end: format_time(v.end.time()),
            minutes: v.minutes(),
            v_doroge,
            fir_point: String::new(),
            last_point: String::new(),
        })
        .collect();

    let mut first_last: BTreeMap<(NaiveDate, &str), (usize, usize)> = BTreeMap::new();
    for (i, v) in visits.iter().enumerate() {
        if v.tech.is_empty() {
            continue;
        }
        first_last
            .entry((v.day(), v.tech.as_str()))
            .and_modify(|(_, last)| *last = i)
            .or_insert((i, i));
    }
    for (first, last) in first_last.into_values() {
        rows[first].fir_point = MARK.to_string();
        rows[last].last_point = MARK.to_string();
    }
    rows
}

/// Turns ON/OFF service events into visit rows.
#[derive(Debug)]
pub struct VisitsStage {
    ctx: PipelineContext,
}

impl VisitsStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "🔄 Processing raw service data...").await;
        let data = &self.ctx.data;
        if !data.exists(SERVICE_MONTH) {
            return Ok(progress.fail(0.0, format!("{SERVICE_MONTH} not found")).await);
        }
        let events = read_events(&Table::read(&data.path(SERVICE_MONTH))?);
        progress
            .detail(format!("{} service events read", events.len()))
            .await;

        let rows = visit_rows(pair_visits(&events));
        write_records(&data.path(SERVICE_VISITS), &rows, &VISIT_COLUMNS)?;
        if rows.is_empty() {
            return Ok(progress.warn(100.0, "No ON/OFF pairs found, the table is empty").await);
        }
        progress
            .report(100.0, format!("✅ {} visits written to {SERVICE_VISITS}", rows.len()))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for VisitsStage {
    fn label(&self) -> &str {
        "Visits"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOG: &str = "2024-02-03 *09:00:00*,Service ON - Ivan,Зелена 5\n\
                       2024-02-03 09:20:00,Service OFF,Зелена 5\n\
                       2024-02-03 10:00:00,Service ON - Ivan,Лесі 1\n\
                       2024-02-03 10:45:30,Service OFF,Лесі 1\n\
                       2024-02-03 11:00:00,Service OFF,Шевченка 12\n\
                       2024-02-04 08:00:00,Service ON,Шевченка 12\n\
                       2024-02-04 08:10:00,Service OFF,Шевченка 12\n";

    #[test]
    fn test_headerless_log_keeps_first_row() {
        let events = read_events(&Table::parse(LOG).unwrap());
        assert_eq!(events.len(), 7);
        assert_eq!(events[0].aparat, "Зелена 5");
    }

    #[test]
    fn test_headed_log() {
        let text = format!("Дата,Подія,Апарат\n{LOG}");
        assert_eq!(read_events(&Table::parse(&text).unwrap()).len(), 7);
    }

    #[test]
    fn test_rows_travel_and_markers() {
        let visits = pair_visits(&read_events(&Table::parse(LOG).unwrap()));
        assert_eq!(visits.len(), 3);

        let rows = visit_rows(visits);

        let ivan: Vec<&VisitRow> = rows.iter().filter(|r| r.tech == "Ivan").collect();
        assert_eq!(ivan.len(), 2);
        assert_eq!(ivan[0].aparat, "Зелена 5");
        assert_eq!(ivan[0].v_doroge, 0);
        assert_eq!(ivan[0].fir_point, MARK);
        assert_eq!(ivan[0].last_point, "");
        assert_eq!(ivan[1].v_doroge, 40);
        assert_eq!(ivan[1].minutes, 45);
        assert_eq!(ivan[1].last_point, MARK);

        let anonymous = rows.iter().find(|r| r.tech.is_empty()).unwrap();
        assert_eq!(anonymous.data, "2024-02-04");
        assert_eq!(anonymous.fir_point, "");
    }
}
