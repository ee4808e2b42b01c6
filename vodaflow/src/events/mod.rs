//! Progress sinks.
//!
//! A sink receives the runner's [`ProgressEvent`](crate::core::ProgressEvent)s
//! and turns them into something an operator can see: a log line, an
//! in-place edited chat message, or a persisted run journal.

mod journal;
mod live;
mod sink;

pub use journal::RunJournal;
pub use live::{truncate_preview, ChatId, ChatSurface, LiveStatusSink, MessageId, SurfaceError};
pub use sink::{CollectingSink, FnSink, LoggingSink, NoOpSink, ProgressSink};
