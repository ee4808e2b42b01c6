//! A chat surface that prints to a terminal.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use vodaflow::events::{ChatId, ChatSurface, MessageId, SurfaceError};

/// Writes every outgoing message, edit and document to `out`.
pub struct ConsoleSurface<W> {
    out: Mutex<W>,
    next_id: Mutex<MessageId>,
}

impl<W: Write + Send> ConsoleSurface<W> {
    /// Creates a surface writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: Mutex::new(0),
        }
    }

    fn print(&self, line: &str) -> Result<(), SurfaceError> {
        let mut out = self.out.lock();
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|e| SurfaceError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
impl ConsoleSurface<Vec<u8>> {
    /// Everything written so far.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.out.lock()).into_owned()
    }
}

#[async_trait]
impl<W: Write + Send> ChatSurface for ConsoleSurface<W> {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageId, SurfaceError> {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.print(&format!("[{chat}#{id}] {text}"))?;
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
    ) -> Result<(), SurfaceError> {
        if message > *self.next_id.lock() {
            return Err(SurfaceError::MessageNotFound(message));
        }
        self.print(&format!("[{chat}#{message} edited] {text}"))
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<(), SurfaceError> {
        if !path.is_file() {
            return Err(SurfaceError::Document(format!("{} not found", path.display())));
        }
        self.print(&format!("[{chat} file] {caption}: {}", path.display()))
    }
}
