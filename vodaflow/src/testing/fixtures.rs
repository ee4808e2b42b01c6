//! Ready-made contexts and data files.

use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;

use crate::config::{RunnerConfig, VodaflowConfig};
use crate::pipelines::PipelineContext;
use crate::utils::FixedClock;

/// The date fixture clocks stand still on.
#[must_use]
pub fn fixture_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap_or_default()
}

/// Default configuration with `dir` as data directory, no pauses and no
/// API delays.
#[must_use]
pub fn fixture_config(dir: &Path) -> VodaflowConfig {
    let mut config = VodaflowConfig {
        data_dir: dir.to_path_buf(),
        runner: RunnerConfig::immediate(),
        ..VodaflowConfig::default()
    };
    config.api.telemetry_delay_ms = 0;
    config.api.cash_delay_ms = 0;
    config.geocoder.politeness_delay_ms = 0;
    config
}

/// A context over `dir` at noon of [`fixture_today`].
#[must_use]
pub fn fixture_context(dir: &Path) -> PipelineContext {
    PipelineContext::new(
        Arc::new(fixture_config(dir)),
        Arc::new(FixedClock::at_noon(fixture_today())),
    )
}

/// Writes `text` as a data file, creating the directory.
pub fn write_fixture(dir: &Path, name: &str, text: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(name), text)
}
