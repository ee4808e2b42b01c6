//! Global percent arithmetic and the text progress bar.

use std::time::Duration;

/// Number of cells in the progress bar.
pub const BAR_LENGTH: usize = 20;

const FILLED: &str = "🟩";
const EMPTY: &str = "⬜";

/// Rescales a stage-local percent into a pipeline-wide percent.
///
/// `index` is the 0-based position of the stage among `total` stages. Local
/// percents outside `[0, 100]` are clamped before use, and so is the result.
/// `total` must be at least one.
#[must_use]
pub fn global_percent(index: usize, total: usize, local: f64) -> f64 {
    debug_assert!(total > 0, "global percent needs at least one stage");
    let total = total.max(1) as f64;
    let local = if local.is_nan() { 0.0 } else { local.clamp(0.0, 100.0) };
    (((index as f64) * 100.0 + local) / total).clamp(0.0, 100.0)
}

/// Renders `[🟩🟩⬜…] N%` for a percent in `[0, 100]`.
#[must_use]
pub fn progress_bar(percent: f64) -> String {
    let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((BAR_LENGTH as f64 * percent / 100.0).floor() as usize).min(BAR_LENGTH);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = percent.floor() as u32;
    format!(
        "[{}{}] {whole}%",
        FILLED.repeat(filled),
        EMPTY.repeat(BAR_LENGTH - filled)
    )
}

/// Formats a duration as minutes with one decimal.
#[must_use]
pub fn format_elapsed_minutes(elapsed: Duration) -> String {
    format!("{:.1}", elapsed.as_secs_f64() / 60.0)
}
