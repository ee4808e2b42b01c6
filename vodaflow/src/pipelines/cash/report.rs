//! Cash stage 3: per-technician totals.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::pipelines::files::{CASH_REPORT, INKAS_LINKED};
use crate::pipelines::{required, PipelineContext};
use crate::stages::{Stage, StageProgress};
use crate::table::{parse_number, Table};
use crate::utils::parse_datetime;

/// Totals of one technician.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    /// Number of collections.
    pub collections: usize,
    /// Collected sum.
    pub sum: f64,
    /// Banknote part.
    pub banknotes: f64,
    /// Coin part.
    pub coins: f64,
}

impl Totals {
    fn add(&mut self, other: &Self) {
        self.collections += other.collections;
        self.sum += other.sum;
        self.banknotes += other.banknotes;
        self.coins += other.coins;
    }
}

/// Collection totals over `inki5nedel.csv`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CashSummary {
    /// Totals per technician, by name.
    pub by_technician: BTreeMap<String, Totals>,
    /// Totals of collections nobody was linked to.
    pub unassigned: Totals,
    /// Earliest and latest collection time.
    pub period: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl CashSummary {
    /// Computes totals from the linked collection table.
    pub fn from_table(table: &Table) -> Self {
        let mut summary = Self::default();
        for row in table.iter() {
            let amount = |name: &str| parse_number(row.get(name)).unwrap_or(0.0);
            let totals = Totals {
                collections: 1,
                sum: amount("sum"),
                banknotes: amount("banknotes"),
                coins: amount("coins"),
            };
            let tech = row.get("tech").trim();
            if tech.is_empty() {
                summary.unassigned.add(&totals);
            } else {
                summary
                    .by_technician
                    .entry(tech.to_string())
                    .or_default()
                    .add(&totals);
            }
            if let Some(at) = parse_datetime(row.get("date")) {
                summary.period = Some(match summary.period {
                    Some((first, last)) => (first.min(at), last.max(at)),
                    None => (at, at),
                });
            }
        }
        summary
    }

    /// Totals over everything.
    #[must_use]
    pub fn overall(&self) -> Totals {
        let mut all = self.unassigned;
        for totals in self.by_technician.values() {
            all.add(totals);
        }
        all
    }

    /// The full text report.
    #[must_use]
    pub fn render_report(&self, generated: NaiveDateTime) -> String {
        let mut out = String::from("CASH COLLECTION REPORT\n");
        let _ = writeln!(out, "Generated: {}", generated.format("%Y-%m-%d %H:%M"));
        if let Some((first, last)) = self.period {
            let _ = writeln!(
                out,
                "Period: {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            );
        }
        out.push('\n');
        for (tech, t) in &self.by_technician {
            let _ = writeln!(
                out,
                "{tech}: {} collections, sum {:.2}, banknotes {:.2}, coins {:.2}",
                t.collections, t.sum, t.banknotes, t.coins
            );
        }
        if self.unassigned.collections > 0 {
            let _ = writeln!(
                out,
                "Unassigned: {} collections, sum {:.2}",
                self.unassigned.collections, self.unassigned.sum
            );
        }
        let all = self.overall();
        let _ = writeln!(out, "\nTotal: {} collections, sum {:.2}", all.collections, all.sum);
        out
    }

    /// The short chat version.
    #[must_use]
    pub fn render_short(&self) -> String {
        let all = self.overall();
        let mut out = format!("💰 Collections: {}, sum {:.2}\n", all.collections, all.sum);
        for (tech, t) in &self.by_technician {
            let _ = writeln!(out, "👷 {tech}: {} / {:.2}", t.collections, t.sum);
        }
        if self.unassigned.collections > 0 {
            let _ = writeln!(out, "⚠️ Unassigned: {}", self.unassigned.collections);
        }
        out.trim_end().to_string()
    }
}

/// Writes `otchet_inki.txt`.
#[derive(Debug)]
pub struct ReportStage {
    ctx: PipelineContext,
}

impl ReportStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        let data = &self.ctx.data;
        if !data.exists(INKAS_LINKED) {
            return Ok(progress.fail(0.0, format!("{INKAS_LINKED} not found")).await);
        }
        progress.report(20.0, "📄 Building the report...").await;
        let summary = CashSummary::from_table(&Table::read(&data.path(INKAS_LINKED))?);
        let text = summary.render_report(self.ctx.clock.now());
        let path = data.path(CASH_REPORT);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text)?;
        progress
            .report(100.0, format!("✅ Report written to {CASH_REPORT}"))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn label(&self) -> &str {
        "Report"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}
