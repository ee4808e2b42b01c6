//! Progress sink trait and implementations.

use crate::core::ProgressEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, Level};

/// Trait for sinks that receive progress text.
///
/// `notify` is fire-and-forget: implementations must never fail or panic
/// on display errors.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Receives one rendered status text.
    async fn notify(&self, text: &str);

    /// Receives a structured event.
    ///
    /// The default renders the event and forwards displayable text to
    /// [`notify`](Self::notify).
    async fn record(&self, event: &ProgressEvent) {
        if let Some(text) = event.display_text() {
            self.notify(&text).await;
        }
    }
}

#[async_trait]
impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    async fn notify(&self, text: &str) {
        (**self).notify(text).await;
    }

    async fn record(&self, event: &ProgressEvent) {
        (**self).record(event).await;
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

#[async_trait]
impl ProgressSink for NoOpSink {
    async fn notify(&self, _text: &str) {}
}

/// A sink wrapping a plain callback.
pub struct FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    func: F,
}

impl<F> FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    /// Creates a new callback sink.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> std::fmt::Debug for FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    async fn notify(&self, text: &str) {
        (self.func)(text);
    }
}

/// A sink that logs progress using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingSink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_text(&self, kind: &str, text: &str) {
        if self.level == Level::DEBUG {
            debug!(kind = %kind, "{}", text);
        } else {
            info!(kind = %kind, "{}", text);
        }
    }
}

#[async_trait]
impl ProgressSink for LoggingSink {
    async fn notify(&self, text: &str) {
        self.log_text("notice", text);
    }

    async fn record(&self, event: &ProgressEvent) {
        let kind = match event {
            ProgressEvent::PipelineStarted { .. } => "pipeline_started",
            ProgressEvent::StageProgress { .. } => "stage_progress",
            ProgressEvent::Detail { .. } => "detail",
            ProgressEvent::StageFailed { .. } => "stage_failed",
            ProgressEvent::StageFault { .. } => "stage_fault",
            ProgressEvent::PipelineCompleted { .. } => "pipeline_completed",
            ProgressEvent::Notice { .. } => "notice",
        };
        self.log_text(kind, &event.to_string());
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingSink {
    texts: parking_lot::RwLock<Vec<String>>,
    events: parking_lot::RwLock<Vec<ProgressEvent>>,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every text received through `notify`.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.read().clone()
    }

    /// Returns every structured event received through `record`.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Returns the global percents carried by recorded events, in order.
    #[must_use]
    pub fn global_percents(&self) -> Vec<f64> {
        self.events
            .read()
            .iter()
            .filter_map(ProgressEvent::global_percent)
            .collect()
    }

    /// Returns true if any recorded text contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.texts.read().iter().any(|t| t.contains(needle))
            || self.events.read().iter().any(|e| e.to_string().contains(needle))
    }

    /// Returns the number of received texts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.read().len()
    }

    /// Returns true if nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.read().is_empty() && self.events.read().is_empty()
    }

    /// Clears everything.
    pub fn clear(&self) {
        self.texts.write().clear();
        self.events.write().clear();
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn notify(&self, text: &str) {
        self.texts.write().push(text.to_string());
    }

    async fn record(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
        if let Some(text) = event.display_text() {
            self.notify(&text).await;
        }
    }
}
