//! Structured progress events.
//!
//! Stages and the runner speak in [`ProgressEvent`]s; text is produced only
//! when an event reaches a sink.

use super::progress::{format_elapsed_minutes, progress_bar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// An event emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The runner is about to start the first stage.
    PipelineStarted {
        /// Pipeline name.
        pipeline: String,
        /// Number of stages.
        total: usize,
    },
    /// A stage reported progress.
    StageProgress {
        /// 0-based stage position.
        index: usize,
        /// Number of stages.
        total: usize,
        /// Stage label.
        label: String,
        /// Stage-local percent after clamping.
        local_percent: f64,
        /// Pipeline-wide percent.
        global_percent: f64,
        /// Stage message.
        message: String,
    },
    /// A diagnostic line kept in logs and journals but never displayed live.
    Detail {
        /// Stage label.
        label: String,
        /// The line.
        message: String,
    },
    /// A stage returned a handled failure.
    StageFailed {
        /// 0-based stage position.
        index: usize,
        /// Stage label.
        label: String,
    },
    /// A stage escaped its own error handling.
    StageFault {
        /// 0-based stage position.
        index: usize,
        /// Stage label.
        label: String,
        /// Description of the fault.
        error: String,
    },
    /// Every stage succeeded.
    PipelineCompleted {
        /// Pipeline name.
        pipeline: String,
        /// Wall-clock duration of the run.
        #[serde(with = "duration_secs")]
        elapsed: Duration,
    },
    /// Free-form text from outside the runner (dispatcher, facades).
    Notice {
        /// The text.
        message: String,
    },
}

impl ProgressEvent {
    /// Creates a notice event.
    #[must_use]
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    /// Returns the global percent carried by this event, if any.
    #[must_use]
    pub fn global_percent(&self) -> Option<f64> {
        match self {
            Self::StageProgress { global_percent, .. } => Some(*global_percent),
            Self::PipelineCompleted { .. } => Some(100.0),
            _ => None,
        }
    }

    /// Returns true for terminal failure events.
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::StageFailed { .. } | Self::StageFault { .. })
    }

    /// Renders the text shown on a live display.
    ///
    /// Returns `None` for events that only belong in logs.
    #[must_use]
    pub fn display_text(&self) -> Option<String> {
        match self {
            Self::Detail { .. } => None,
            _ => Some(self.to_string()),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PipelineStarted { pipeline, total } => {
                write!(f, "🚀 Starting {pipeline} ({total} stages)")
            }
            Self::StageProgress {
                index,
                total,
                label,
                global_percent,
                message,
                ..
            } => write!(
                f,
                "🚀 Stage {}/{total}: {label}\n{}\n📝 {message}",
                index + 1,
                progress_bar(*global_percent)
            ),
            Self::Detail { label, message } => write!(f, "[{label}] {message}"),
            Self::StageFailed { label, .. } => write!(f, "⛔️ Stopped: error at stage {label}"),
            Self::StageFault { label, error, .. } => {
                write!(f, "🔥 CRITICAL ERROR: {label}\n{error}")
            }
            Self::PipelineCompleted { pipeline, elapsed } => write!(
                f,
                "🏁 {pipeline} COMPLETE\n{}\nTime: {} min",
                progress_bar(100.0),
                format_elapsed_minutes(*elapsed)
            ),
            Self::Notice { message } => f.write_str(message),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress_text() {
        let event = ProgressEvent::StageProgress {
            index: 1,
            total: 3,
            label: "Sensor logs".to_string(),
            local_percent: 50.0,
            global_percent: 50.0,
            message: "DV6 saved".to_string(),
        };
        let text = event.display_text().unwrap();
        assert!(text.starts_with("🚀 Stage 2/3: Sensor logs\n["));
        assert!(text.contains("] 50%"));
        assert!(text.ends_with("📝 DV6 saved"));
    }

    #[test]
    fn test_detail_is_not_displayed() {
        let event = ProgressEvent::Detail {
            label: "Routes".to_string(),
            message: "cache hit".to_string(),
        };
        assert!(event.display_text().is_none());
        assert_eq!(event.to_string(), "[Routes] cache hit");
    }

    #[test]
    fn test_terminal_events() {
        let failed = ProgressEvent::StageFailed {
            index: 1,
            label: "Device API".to_string(),
        };
        assert!(failed.is_terminal_failure());
        assert_eq!(failed.to_string(), "⛔️ Stopped: error at stage Device API");

        let fault = ProgressEvent::StageFault {
            index: 0,
            label: "Registry".to_string(),
            error: "boom".to_string(),
        };
        assert!(fault.is_terminal_failure());
        assert!(fault.to_string().contains("boom"));
        assert!(!ProgressEvent::notice("x").is_terminal_failure());
    }

    #[test]
    fn test_completed_text() {
        let event = ProgressEvent::PipelineCompleted {
            pipeline: "Operational".to_string(),
            elapsed: Duration::from_secs(120),
        };
        let text = event.to_string();
        assert!(text.starts_with("🏁 Operational COMPLETE"));
        assert!(text.contains("100%"));
        assert!(text.ends_with("Time: 2.0 min"));
        assert_eq!(event.global_percent(), Some(100.0));
    }

    #[test]
    fn test_event_serialize_tagged() {
        let json = serde_json::to_value(ProgressEvent::notice("hello")).unwrap();
        assert_eq!(json["type"], "notice");
        assert_eq!(json["message"], "hello");
    }
}
