//! # Vodaflow
//!
//! Staged data pipelines for a water vending network, with live progress
//! reporting to a chat operator.
//!
//! A pipeline is a fixed list of stages run strictly in order. Each stage
//! pulls data from the management portal, the device API or files written
//! by earlier stages, and reports its own 0 to 100 progress. The runner
//! folds stage progress into one global percentage, stops at the first
//! failing stage and turns escaped errors and panics into a reported fault.
//!
//! - **Stages** implement [`stages::Stage`] and talk to the operator through
//!   [`stages::StageProgress`].
//! - **Sinks** ([`events::ProgressSink`]) decide what the operator sees: a
//!   log line, one chat message edited in place, a persisted run journal.
//! - **Pipelines** ([`pipelines::Pipeline`]) bind a stage list to a
//!   workflow: operational data, cash collections, field service.
//! - **Dispatch** maps chat commands to pipelines and runs them in the
//!   background, one run per pipeline at a time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vodaflow::prelude::*;
//!
//! let config = Arc::new(VodaflowConfig::load(None)?);
//! let ctx = PipelineContext::new(config.clone(), Arc::new(SystemClock));
//! let api = Arc::new(ApiClient::new(config.api.clone())?);
//! let cash = CashPipeline::new(ctx, api);
//!
//! let ok = cash.run_full_cycle(Arc::new(LoggingSink::default())).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod pipelines;
pub mod sources;
pub mod stages;
pub mod table;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{RunnerConfig, StatusConfig, VodaflowConfig};
    pub use crate::core::{Artifact, ArtifactKind, ProgressEvent, StageOutcome};
    pub use crate::dispatch::{
        Capabilities, Command, Dispatcher, PipelineScheduler, Role, SchedulerError, SessionStore,
    };
    pub use crate::errors::{Result, VodaflowError};
    pub use crate::events::{
        ChatSurface, CollectingSink, FnSink, LiveStatusSink, LoggingSink, NoOpSink, ProgressSink,
        RunJournal,
    };
    pub use crate::pipeline::{RunReport, RunStatus, StageRunner};
    pub use crate::pipelines::{
        CashPipeline, DataDir, OperationalPipeline, Pipeline, PipelineContext, ServicePipeline,
    };
    pub use crate::sources::{
        ApiClient, DeviceApiSource, GeocodeProvider, NominatimClient, PortalSource,
    };
    pub use crate::stages::{Stage, StageProgress};
    pub use crate::utils::{Clock, FixedClock, SystemClock};
    pub use std::sync::Arc;
}
