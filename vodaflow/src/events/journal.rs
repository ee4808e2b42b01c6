//! Run journal: the full, untruncated text of one pipeline run.

use super::ProgressSink;
use crate::core::ProgressEvent;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

const RULE_WIDTH: usize = 60;

/// A sink that keeps every line it sees and forwards to an inner sink.
///
/// Detail events are written to the journal but not forwarded for display.
pub struct RunJournal {
    inner: Arc<dyn ProgressSink>,
    lines: Mutex<Vec<String>>,
}

impl std::fmt::Debug for RunJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunJournal")
            .field("lines", &self.lines.lock().len())
            .finish_non_exhaustive()
    }
}

impl RunJournal {
    /// Creates an empty journal in front of `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Creates a journal that starts with a banner naming the run and its
    /// start time.
    #[must_use]
    pub fn with_banner(inner: Arc<dyn ProgressSink>, title: &str, started: NaiveDateTime) -> Self {
        let journal = Self::new(inner);
        let rule = "=".repeat(RULE_WIDTH);
        journal.write_line(rule.clone());
        journal.write_line(format!("🚀 {title}"));
        journal.write_line(format!("📅 {}", started.format("%Y-%m-%d %H:%M:%S")));
        journal.write_line(rule);
        journal
    }

    /// Appends a line without forwarding it.
    pub fn write_line(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    /// Returns the journal text.
    #[must_use]
    pub fn content(&self) -> String {
        let lines = self.lines.lock();
        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        text
    }

    /// Writes the journal to `path`, replacing any previous file.
    pub fn persist(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.content())
    }
}

#[async_trait]
impl ProgressSink for RunJournal {
    async fn notify(&self, text: &str) {
        self.write_line(text);
        self.inner.notify(text).await;
    }

    async fn record(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Detail { message, .. } => self.write_line(message.clone()),
            other => self.write_line(other.to_string()),
        }
        self.inner.record(event).await;
    }
}
