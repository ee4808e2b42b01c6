//! Operator-facing command dispatch.
//!
//! The dispatcher owns everything the pipelines do not care about: who is
//! logged in, which pipelines this deployment has, and running a pipeline in
//! the background while its live status message is edited in place. Session
//! state is an explicit [`SessionStore`] handed in by the host.

mod command;
mod dispatcher;
mod scheduler;
mod session;

pub use command::{Capabilities, Command};
pub use dispatcher::{Dispatcher, ACCESS_DENIED, GREETING, LOGGED_OUT, UNKNOWN_COMMAND};
pub use scheduler::{PipelineScheduler, RunHandle, SchedulerError};
pub use session::{authenticate, Role, SessionStore};
