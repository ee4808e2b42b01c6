//! Live status display over a chat surface.
//!
//! [`LiveStatusSink`] keeps a single status message per pipeline run and
//! edits it in place as progress arrives.

use super::ProgressSink;
use crate::config::StatusConfig;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Identifier of a chat (one operator conversation).
pub type ChatId = i64;

/// Identifier of a message inside a chat.
pub type MessageId = i64;

/// Errors raised by a chat surface.
#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    /// The message to edit no longer exists.
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    /// The surface cannot be reached.
    #[error("surface unavailable: {0}")]
    Unavailable(String),
    /// A document could not be read or delivered.
    #[error("document error: {0}")]
    Document(String),
}

/// The outbound side of a chat front-end.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Sends a new message and returns its id.
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageId, SurfaceError>;

    /// Replaces the text of an existing message.
    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
    ) -> Result<(), SurfaceError>;

    /// Sends a file with a caption.
    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<(), SurfaceError>;
}

#[derive(Debug, Default)]
struct LiveState {
    message: Option<MessageId>,
    last_text: Option<String>,
    last_update: Option<Instant>,
}

/// A progress sink that edits one chat message in place.
///
/// Identical consecutive texts are dropped, long texts are cut to the
/// configured preview length with a `...` marker, and display failures are
/// swallowed.
pub struct LiveStatusSink {
    surface: Arc<dyn ChatSurface>,
    chat: ChatId,
    config: StatusConfig,
    state: Mutex<LiveState>,
}

impl std::fmt::Debug for LiveStatusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStatusSink")
            .field("chat", &self.chat)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LiveStatusSink {
    /// Creates a sink that sends its status message on the first notify.
    #[must_use]
    pub fn new(surface: Arc<dyn ChatSurface>, chat: ChatId, config: StatusConfig) -> Self {
        Self {
            surface,
            chat,
            config,
            state: Mutex::new(LiveState::default()),
        }
    }

    /// Creates a sink and immediately sends the status message with
    /// `initial` as its text.
    ///
    /// Returns `None` if the surface refused the message.
    pub async fn open(
        surface: Arc<dyn ChatSurface>,
        chat: ChatId,
        config: StatusConfig,
        initial: &str,
    ) -> Option<Self> {
        let sink = Self::new(surface, chat, config);
        let text = format!("{}{initial}", sink.config.prefix);
        match sink.surface.send_message(chat, &text).await {
            Ok(id) => {
                sink.state.lock().await.message = Some(id);
                Some(sink)
            }
            Err(err) => {
                debug!(chat, error = %err, "Could not open status message");
                None
            }
        }
    }

    /// Returns the id of the status message once it exists.
    pub async fn message_id(&self) -> Option<MessageId> {
        self.state.lock().await.message
    }

    /// Returns the last accepted text, untruncated.
    pub async fn last_text(&self) -> Option<String> {
        self.state.lock().await.last_text.clone()
    }

    /// Cuts `text` to the preview length.
    #[must_use]
    pub fn preview(&self, text: &str) -> String {
        truncate_preview(text, self.config.preview_limit)
    }
}

/// Cuts `text` to at most `limit` characters followed by `...`.
#[must_use]
pub fn truncate_preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    }
}

#[async_trait]
impl ProgressSink for LiveStatusSink {
    async fn notify(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.last_text.as_deref() == Some(text) {
            return;
        }
        state.last_text = Some(text.to_string());

        let min_interval = self.config.min_edit_interval();
        if let Some(last) = state.last_update {
            let since = last.elapsed();
            if since < min_interval {
                tokio::time::sleep(min_interval - since).await;
            }
        }

        let display = format!("{}{}", self.config.prefix, self.preview(text));
        let existing = state.message;
        let result = match existing {
            Some(id) => self.surface.edit_message(self.chat, id, &display).await,
            None => self
                .surface
                .send_message(self.chat, &display)
                .await
                .map(|id| state.message = Some(id)),
        };
        state.last_update = Some(Instant::now());

        if let Err(err) = result {
            debug!(chat = self.chat, error = %err, "Status update dropped");
        }
    }
}
