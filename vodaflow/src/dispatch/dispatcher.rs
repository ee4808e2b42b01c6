//! Chat message handling: login, admin menu, pipeline launches.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{authenticate, Capabilities, Command, PipelineScheduler, RunHandle, SessionStore};
use crate::config::{AccessConfig, StatusConfig};
use crate::core::ArtifactKind;
use crate::events::{ChatId, ChatSurface, LiveStatusSink, ProgressSink};
use crate::pipelines::files::{CASH_REPORT, ROUTES_MAP, SERVICE_LOG};
use crate::pipelines::{DataDir, Pipeline};

/// Greeting for `/start`.
pub const GREETING: &str = "👋 Hello! Enter your access code:";
/// Reply to an unknown access code.
pub const ACCESS_DENIED: &str = "⛔️ Invalid access code.";
/// Reply to an unknown admin command.
pub const UNKNOWN_COMMAND: &str = "Unknown command.";
/// Reply after logout.
pub const LOGGED_OUT: &str = "🔒 Logged out. Enter your access code again:";

/// Routes chat messages of all operators.
pub struct Dispatcher {
    surface: Arc<dyn ChatSurface>,
    sessions: Arc<SessionStore>,
    access: AccessConfig,
    capabilities: Capabilities,
    scheduler: PipelineScheduler,
    status: StatusConfig,
    data: DataDir,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sessions", &self.sessions.len())
            .field("capabilities", &self.capabilities)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over a shared session store.
    pub fn new(
        surface: Arc<dyn ChatSurface>,
        sessions: Arc<SessionStore>,
        access: AccessConfig,
        capabilities: Capabilities,
        status: StatusConfig,
        data: DataDir,
    ) -> Self {
        Self {
            surface,
            sessions,
            access,
            capabilities,
            scheduler: PipelineScheduler::new(),
            status,
            data,
        }
    }

    /// The scheduler running pipeline jobs.
    #[must_use]
    pub fn scheduler(&self) -> &PipelineScheduler {
        &self.scheduler
    }

    /// Handles one incoming message.
    ///
    /// Returns the handle of the pipeline run the message started, if any.
    pub async fn handle(&self, chat: ChatId, text: &str) -> Option<RunHandle<bool>> {
        let text = text.trim();
        if text == "/start" {
            self.reply(chat, GREETING).await;
            return None;
        }
        match self.sessions.role(chat) {
            Some(role) if role.has_menu() => self.handle_admin(chat, text).await,
            Some(role) => {
                self.sessions.logout(chat);
                self.reply(chat, &format!("⚠️ Role '{role}' is under development."))
                    .await;
                None
            }
            None => {
                self.login(chat, text).await;
                None
            }
        }
    }

    async fn login(&self, chat: ChatId, code: &str) {
        match authenticate(&self.access, code) {
            Some(role) if role.has_menu() => {
                info!(chat, role = %role, "Operator logged in");
                let welcome = format!(
                    "✅ Welcome, {}!\n{}",
                    role.name().to_uppercase(),
                    Command::menu()
                );
                self.sessions.login(chat, role);
                self.reply(chat, &welcome).await;
            }
            Some(role) => {
                self.reply(chat, &format!("⚠️ Role '{role}' is under development."))
                    .await;
            }
            None => self.reply(chat, ACCESS_DENIED).await,
        }
    }

    async fn handle_admin(&self, chat: ChatId, text: &str) -> Option<RunHandle<bool>> {
        let Some(command) = Command::parse(text) else {
            self.reply(chat, UNKNOWN_COMMAND).await;
            return None;
        };
        match command {
            Command::RunOperational | Command::RunCash | Command::RunService => {
                match self.capabilities.resolve(command) {
                    Ok(pipeline) => self.launch(chat, pipeline).await,
                    Err(e) => {
                        self.reply(chat, &format!("❌ {e}")).await;
                        None
                    }
                }
            }
            Command::CashReport => {
                let report = self.data.path(CASH_REPORT);
                let sent = self
                    .send_file(chat, &report, "📂 Latest cash collection report")
                    .await;
                if !sent {
                    self.reply(chat, "❌ The report has not been generated yet.").await;
                }
                None
            }
            Command::ServiceReport => {
                let log = self
                    .send_file(chat, &self.data.path(SERVICE_LOG), "📄 Service report")
                    .await;
                let map = self
                    .send_file(chat, &self.data.path(ROUTES_MAP), "🗺 Routes map")
                    .await;
                if !log && !map {
                    self.reply(chat, "❌ Report files not found. Run the service pipeline first.")
                        .await;
                }
                None
            }
            Command::Logout => {
                self.sessions.logout(chat);
                self.reply(chat, LOGGED_OUT).await;
                None
            }
        }
    }

    async fn launch(&self, chat: ChatId, pipeline: Arc<dyn Pipeline>) -> Option<RunHandle<bool>> {
        let name = pipeline.name().to_string();
        let surface = self.surface.clone();
        let status = self.status.clone();
        let job = async move {
            let opening = format!("Starting {}...", pipeline.name());
            let Some(live) = LiveStatusSink::open(surface.clone(), chat, status, &opening).await
            else {
                warn!(chat, "Status message could not be opened, run skipped");
                return false;
            };
            let live = Arc::new(live);
            let ok = pipeline.run_full_cycle(live.clone()).await;
            deliver(surface.as_ref(), chat, pipeline.as_ref(), live.as_ref(), ok).await;
            ok
        };
        match self.scheduler.submit(&name, job) {
            Ok(handle) => {
                info!(chat, pipeline = %name, "Pipeline started");
                Some(handle)
            }
            Err(e) => {
                self.reply(chat, &format!("⏳ {e}, wait for it to finish.")).await;
                None
            }
        }
    }

    async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.surface.send_message(chat, text).await {
            warn!(chat, error = %e, "Reply failed");
        }
    }

    async fn send_file(&self, chat: ChatId, path: &Path, caption: &str) -> bool {
        if !path.is_file() {
            return false;
        }
        match self.surface.send_document(chat, path, caption).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chat, error = %e, "Sending document failed");
                false
            }
        }
    }
}

/// Sends the results of a finished run: summary text and documents on
/// success, a failure notice otherwise.
async fn deliver(
    surface: &dyn ChatSurface,
    chat: ChatId,
    pipeline: &dyn Pipeline,
    live: &LiveStatusSink,
    ok: bool,
) {
    if !ok {
        live.notify(&format!("❌ {} finished with an error.", pipeline.name()))
            .await;
        return;
    }
    let documents: Vec<_> = pipeline
        .artifacts()
        .into_iter()
        .filter(|a| a.kind != ArtifactKind::Table)
        .collect();
    let summary = pipeline.summary_text();
    if summary.is_none() && documents.is_empty() {
        return;
    }
    live.notify("✅ Done! Sending results...").await;
    if let Some(summary) = summary {
        if let Err(e) = surface.send_message(chat, &summary).await {
            warn!(chat, error = %e, "Sending summary failed");
        }
    }
    for artifact in documents {
        if let Err(e) = surface.send_document(chat, artifact.path(), &artifact.caption).await {
            warn!(chat, file = %artifact.file_name(), error = %e, "Sending document failed");
            let _ = surface
                .send_message(chat, &format!("Could not send {}: {e}", artifact.file_name()))
                .await;
        }
    }
}
