//! Stage outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The handled result of running a stage.
///
/// `Fail` means the stage already reported why it failed and the runner
/// must stop the pipeline. Best-effort stages report a warning and return
/// `Ok` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Downstream stages may proceed.
    Ok,
    /// The pipeline must stop.
    Fail,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl StageOutcome {
    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<bool> for StageOutcome {
    fn from(success: bool) -> Self {
        if success {
            Self::Ok
        } else {
            Self::Fail
        }
    }
}

impl From<StageOutcome> for bool {
    fn from(outcome: StageOutcome) -> Self {
        outcome.is_success()
    }
}
