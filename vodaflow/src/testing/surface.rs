//! In-memory chat surface.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::events::{ChatId, ChatSurface, MessageId, SurfaceError};

/// One outbound call captured by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    /// A new message.
    Send {
        /// Target chat.
        chat: ChatId,
        /// Assigned id.
        id: MessageId,
        /// Text.
        text: String,
    },
    /// An edit of an existing message.
    Edit {
        /// Target chat.
        chat: ChatId,
        /// Edited message.
        id: MessageId,
        /// New text.
        text: String,
    },
    /// A document.
    Document {
        /// Target chat.
        chat: ChatId,
        /// File sent.
        path: PathBuf,
        /// Caption.
        caption: String,
    },
}

/// A chat surface that records every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    next_id: Mutex<MessageId>,
    failing: bool,
}

impl RecordingSurface {
    /// Creates a working surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a surface whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().clone()
    }

    /// Returns the texts of new messages.
    #[must_use]
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SurfaceCall::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the texts of edits.
    #[must_use]
    pub fn edit_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SurfaceCall::Edit { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the file names of sent documents.
    #[must_use]
    pub fn document_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SurfaceCall::Document { path, .. } => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Returns true if any sent or edited text contains `needle`.
    #[must_use]
    pub fn saw_text(&self, needle: &str) -> bool {
        self.calls.lock().iter().any(|c| match c {
            SurfaceCall::Send { text, .. } | SurfaceCall::Edit { text, .. } => {
                text.contains(needle)
            }
            SurfaceCall::Document { .. } => false,
        })
    }

    fn check(&self) -> Result<(), SurfaceError> {
        if self.failing {
            Err(SurfaceError::Unavailable("recording surface set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatSurface for RecordingSurface {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageId, SurfaceError> {
        self.check()?;
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.calls.lock().push(SurfaceCall::Send {
            chat,
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
    ) -> Result<(), SurfaceError> {
        self.check()?;
        self.calls.lock().push(SurfaceCall::Edit {
            chat,
            id: message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<(), SurfaceError> {
        self.check()?;
        if !path.is_file() {
            return Err(SurfaceError::Document(format!("{} not found", path.display())));
        }
        self.calls.lock().push(SurfaceCall::Document {
            chat,
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}
