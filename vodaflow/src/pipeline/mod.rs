//! Pipeline execution.
//!
//! This module provides:
//! - The sequential stage runner
//! - Retry handling for outbound HTTP calls

mod retry;
mod runner;

pub use retry::{backoff_delay, classify_response, send_with_retry, with_retry, RetryDecision};
pub use runner::{RunReport, RunStatus, StageRunner};
