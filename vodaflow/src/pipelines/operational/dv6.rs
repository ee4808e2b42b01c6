//! Stage 5: DV6 on/off cycles per address.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{DV6, IDADRES};
use crate::pipelines::{required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::Table;
use crate::utils::{format_datetime, parse_datetime};

/// Cycles longer than this many seconds are listed in `dv6time`.
pub const LONG_CYCLE_SECS: i64 = 600;

/// One matched on/off pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Switch-on time.
    pub on: NaiveDateTime,
    /// Switch-off time.
    pub off: NaiveDateTime,
}

impl Cycle {
    /// Duration in whole seconds.
    #[must_use]
    pub fn seconds(&self) -> i64 {
        (self.off - self.on).num_seconds()
    }
}

/// Per-address DV6 summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dv6Summary {
    /// Number of complete cycles.
    pub count: usize,
    /// Long cycles, formatted for the registry.
    pub long_cycles: String,
}

/// Pairs DV6 switch events into cycles and writes the counts into the
/// registry.
#[derive(Debug)]
pub struct Dv6CyclesStage {
    ctx: PipelineContext,
}

impl Dv6CyclesStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        let data = &self.ctx.data;
        if !data.exists(DV6) || !data.exists(IDADRES) {
            return Ok(progress.fail(0.0, format!("{DV6} or {IDADRES} is missing")).await);
        }
        progress.report(10.0, "🔄 Processing DV6 data...").await;
        let events = Table::read(&data.path(DV6))?;

        progress.report(30.0, "🔍 Matching ON/OFF pairs...").await;
        let cycles = match_cycles(&events);

        progress.report(50.0, "📊 Building statistics...").await;
        let summary = summarize(&cycles);

        progress.report(70.0, format!("🔗 Updating {IDADRES}...")).await;
        let mut registry = Table::read(&data.path(IDADRES))?;
        if !merge_summary(&mut registry, &summary) {
            return Ok(progress.fail(70.0, format!("No address column in {IDADRES}")).await);
        }
        registry.write(&data.path(IDADRES))?;

        progress
            .report(100.0, format!("✅ Processed {} DV6 devices", summary.len()))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for Dv6CyclesStage {
    fn label(&self) -> &str {
        "DV6 cycles"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

fn unquote(value: &str) -> String {
    value.trim().replace(['"', '\''], "")
}

/// Matches each `off` with the latest unmatched `on` at the same address.
/// Rows with an unreadable timestamp are dropped; an `off` with no open
/// `on` is ignored.
pub fn match_cycles(events: &Table) -> BTreeMap<String, Vec<Cycle>> {
    let mut rows: Vec<(String, NaiveDateTime, String)> = events
        .iter()
        .filter_map(|row| {
            let ts = parse_datetime(&unquote(row.get("Дата")))?;
            Some((
                unquote(row.get("Апарат")),
                ts,
                unquote(row.get("Стан")).to_lowercase(),
            ))
        })
        .collect();
    rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

    let mut open: HashMap<String, NaiveDateTime> = HashMap::new();
    let mut cycles: BTreeMap<String, Vec<Cycle>> = BTreeMap::new();
    for (address, ts, action) in rows {
        match action.as_str() {
            "on" => {
                open.insert(address, ts);
            }
            "off" => {
                if let Some(on) = open.remove(&address) {
                    cycles.entry(address).or_default().push(Cycle { on, off: ts });
                }
            }
            _ => {}
        }
    }
    cycles
}

/// Counts cycles and lists the long ones per address.
pub fn summarize(cycles: &BTreeMap<String, Vec<Cycle>>) -> BTreeMap<String, Dv6Summary> {
    cycles
        .iter()
        .map(|(address, list)| {
            let long_cycles = list
                .iter()
                .filter(|c| c.seconds() > LONG_CYCLE_SECS)
                .map(|c| {
                    format!(
                        "{}s({}-{})",
                        c.seconds(),
                        format_datetime(c.on),
                        format_datetime(c.off)
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            (
                address.clone(),
                Dv6Summary {
                    count: list.len(),
                    long_cycles,
                },
            )
        })
        .collect()
}

/// Replaces `dv6raz`/`dv6time` in the registry, joining on the address
/// column. Returns false if the registry has no address column.
pub fn merge_summary(registry: &mut Table, summary: &BTreeMap<String, Dv6Summary>) -> bool {
    let Some(address_col) = registry.find_column(|h| {
        let h = h.to_lowercase();
        h.contains("adress") || h.contains("адрес") || h.contains("address")
    }) else {
        return false;
    };
    registry.drop_column("dv6raz");
    registry.drop_column("dv6time");
    let count_col = registry.ensure_column("dv6raz", "0");
    let time_col = registry.ensure_column("dv6time", "");
    for row in 0..registry.len() {
        let address = unquote(registry.get(row, address_col));
        let entry = summary.get(&address).cloned().unwrap_or_default();
        registry.set(row, address_col, address);
        registry.set(row, count_col, entry.count.to_string());
        registry.set(row, time_col, entry.long_cycles);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::{fixture_context, write_fixture};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn events() -> Table {
        Table::parse(
            "Дата,Датчик,Стан,Апарат\n\
             2024-03-10 10:00:00,dv6,ON,Зелена 5\n\
             2024-03-10 10:05:00,dv6,OFF,Зелена 5\n\
             2024-03-10 11:00:00,dv6,on,Зелена 5\n\
             2024-03-10 11:20:00,dv6,off,Зелена 5\n\
             2024-03-10 09:00:00,dv6,off,\"Шевченка 12\"\n\
             garbage,dv6,on,Шевченка 12\n",
        )
        .unwrap()
    }

    #[test]
    fn test_match_cycles_pairs_per_address() {
        let cycles = match_cycles(&events());
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles["Зелена 5"].len(), 2);
        assert_eq!(cycles["Зелена 5"][1].seconds(), 1200);
    }

    #[test]
    fn test_summary_lists_only_long_cycles() {
        let summary = summarize(&match_cycles(&events()));
        let entry = &summary["Зелена 5"];
        assert_eq!(entry.count, 2);
        assert_eq!(
            entry.long_cycles,
            "1200s(2024-03-10 11:00:00-2024-03-10 11:20:00)"
        );
    }

    #[test]
    fn test_merge_defaults_and_replaces_old_columns() {
        let mut registry =
            Table::parse("id,adress,dv6raz\n1,\"Зелена 5\",9\n2,Шевченка 12,4\n").unwrap();
        let summary = summarize(&match_cycles(&events()));

        assert!(merge_summary(&mut registry, &summary));

        let rows: Vec<_> = registry.iter().collect();
        assert_eq!(rows[0].get("dv6raz"), "2");
        assert_eq!(rows[1].get("dv6raz"), "0");
        assert_eq!(rows[1].get("dv6time"), "");
    }

    #[test]
    fn test_merge_without_address_column() {
        let mut registry = Table::parse("id,name\n1,x\n").unwrap();
        assert!(!merge_summary(&mut registry, &BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_run_updates_registry() {
        let dir = tempdir().unwrap();
        events().write(&dir.path().join(DV6)).unwrap();
        write_fixture(dir.path(), IDADRES, "id,adress
1,Зелена 5
2,Лесі 1
").unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 4, 9, "DV6 cycles");

        let outcome = Dv6CyclesStage::new(fixture_context(dir.path()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        let registry = Table::read(&dir.path().join(IDADRES)).unwrap();
        let rows: Vec<_> = registry.iter().collect();
        assert_eq!(rows[0].get("dv6raz"), "2");
        assert_eq!(rows[1].get("dv6raz"), "0");
        assert!(sink.contains("Processed 1 DV6 devices"));
    }

    #[tokio::test]
    async fn test_run_fails_without_inputs() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 4, 9, "DV6 cycles");

        let outcome = Dv6CyclesStage::new(fixture_context(dir.path()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Fail);
        assert!(sink.contains("is missing"));
    }
}
