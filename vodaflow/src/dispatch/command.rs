//! Admin menu commands and the installed-pipeline registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::SchedulerError;
use crate::pipelines::Pipeline;

/// An admin menu entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Run the operational data pipeline.
    RunOperational,
    /// Run the cash collection pipeline.
    RunCash,
    /// Run the field-service pipeline.
    RunService,
    /// Resend the last cash report.
    CashReport,
    /// Resend the last service log and map.
    ServiceReport,
    /// End the session.
    Logout,
}

impl Command {
    /// Every command, in menu order.
    pub const ALL: [Self; 6] = [
        Self::RunOperational,
        Self::RunCash,
        Self::RunService,
        Self::CashReport,
        Self::ServiceReport,
        Self::Logout,
    ];

    /// Menu button text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RunOperational => "run operational",
            Self::RunCash => "run cash",
            Self::RunService => "run service",
            Self::CashReport => "cash report",
            Self::ServiceReport => "service report",
            Self::Logout => "logout",
        }
    }

    /// Slash form of the command.
    #[must_use]
    pub const fn slash(self) -> &'static str {
        match self {
            Self::RunOperational => "/operational",
            Self::RunCash => "/cash",
            Self::RunService => "/service",
            Self::CashReport => "/cash_report",
            Self::ServiceReport => "/service_report",
            Self::Logout => "/logout",
        }
    }

    /// The button text operators already know from the old menu.
    const fn legacy(self) -> &'static str {
        match self {
            Self::RunOperational => "парсинг рабочий",
            Self::RunCash => "парсинг инкасаций",
            Self::RunService => "парсинг сервиса",
            Self::CashReport => "отчет по инкасациям",
            Self::ServiceReport => "отчет по сервису",
            Self::Logout => "выйти с роли",
        }
    }

    /// Parses a menu label, slash command or legacy button text.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| text == c.label() || text == c.slash() || text == c.legacy())
    }

    /// Returns true if the command starts a pipeline.
    #[must_use]
    pub const fn runs_pipeline(self) -> bool {
        matches!(self, Self::RunOperational | Self::RunCash | Self::RunService)
    }

    /// The admin menu text.
    #[must_use]
    pub fn menu() -> String {
        Self::ALL
            .iter()
            .map(|c| format!("• {} ({})", c.label(), c.slash()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which pipelines this deployment has.
///
/// A command mapped to `None` is known but not installed.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pipelines: HashMap<Command, Option<Arc<dyn Pipeline>>>,
}

impl Capabilities {
    /// Creates a registry where every pipeline command is uninstalled.
    #[must_use]
    pub fn new() -> Self {
        let pipelines = Command::ALL
            .into_iter()
            .filter(|c| c.runs_pipeline())
            .map(|c| (c, None))
            .collect();
        Self { pipelines }
    }

    /// Installs `pipeline` behind `command`.
    #[must_use]
    pub fn with(mut self, command: Command, pipeline: Arc<dyn Pipeline>) -> Self {
        self.pipelines.insert(command, Some(pipeline));
        self
    }

    /// The pipeline behind `command`.
    pub fn resolve(&self, command: Command) -> Result<Arc<dyn Pipeline>, SchedulerError> {
        self.pipelines
            .get(&command)
            .cloned()
            .flatten()
            .ok_or_else(|| SchedulerError::Unavailable(command.label().to_string()))
    }

    /// Returns true if `command` has a pipeline.
    #[must_use]
    pub fn is_installed(&self, command: Command) -> bool {
        matches!(self.pipelines.get(&command), Some(Some(_)))
    }
}
