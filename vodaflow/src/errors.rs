//! Error types for the vodaflow crate.
//!
//! Stages distinguish between a *handled* failure (reported through the
//! progress sink and returned as [`crate::core::StageOutcome::Fail`]) and an
//! *uncaught* fault, which is any [`VodaflowError`] escaping a stage. The
//! runner converts faults into a terminal fault event.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vodaflow operations.
#[derive(Debug, Error)]
pub enum VodaflowError {
    /// Invalid construction input (e.g. an empty stage list).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A prerequisite data file is missing.
    #[error("Missing input file: {}", path.display())]
    MissingInput {
        /// The file that was expected.
        path: PathBuf,
    },

    /// A dataset exists but cannot be interpreted.
    #[error("Unexpected structure in {source_name}: {message}")]
    Structure {
        /// The dataset (usually a file name).
        source_name: String,
        /// What was wrong with it.
        message: String,
    },

    /// The management portal rejected or broke an interaction.
    #[error("Portal error: {0}")]
    Portal(String),

    /// The device API returned an unusable answer.
    #[error("API error: {0}")]
    Api(String),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),

    /// A report or map could not be rendered.
    #[error("Render error: {0}")]
    Render(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VodaflowError {
    /// Creates a missing input error.
    #[must_use]
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::MissingInput { path: path.into() }
    }

    /// Creates a structure error.
    #[must_use]
    pub fn structure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structure {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Returns true if a retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl From<askama::Error> for VodaflowError {
    fn from(err: askama::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<toml::de::Error> for VodaflowError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = VodaflowError> = std::result::Result<T, E>;
