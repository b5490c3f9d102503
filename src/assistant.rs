// assistant.rs — Background orchestration: command → directive → browser,
// session captures, and questions about the session sent to the backend.
//
// Owns the session store. Collaborators (browser, backend, history) are
// injected so the host decides their lifetime.

use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex as TokioMutex;

use crate::accounts::{ActivityKind, ActivityLog};
use crate::ai::{AiError, AssistantBackend, BackendReply, ConversationEntry, HttpBackend, Role};
use crate::browser::{BrowserApi, BrowserError};
use crate::capture::{prepare_for_upload, strip_data_url, UploadOptions};
use crate::dispatcher::{BackendDirective, CommandDispatcher, CommandResult};
use crate::session::{self, CapturedImage, SessionStore};
use crate::settings::Settings;

/// Which panel view is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Command,
    Chat,
    Settings,
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    Typed,
    Voice,
}

/// Result of `run_command`: either a browser action ran, or the backend
/// answered in text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandOutcome {
    Executed { result: CommandResult },
    Answered { text: String },
}

/// Signed-in user whose activity is recorded.
struct HistorySink {
    log: Arc<ActivityLog>,
    user_id: String,
}

pub struct Assistant {
    browser: Arc<dyn BrowserApi>,
    dispatcher: Mutex<Arc<CommandDispatcher>>,
    backend: Mutex<Option<Arc<dyn AssistantBackend>>>,
    history: Mutex<Option<HistorySink>>,
    session: TokioMutex<SessionStore>,
    upload: Mutex<UploadOptions>,
    conversation: Mutex<Vec<ConversationEntry>>,
    view: Mutex<View>,
}

impl Assistant {
    pub fn new(browser: Arc<dyn BrowserApi>) -> Self {
        let dispatcher = CommandDispatcher::new(Arc::clone(&browser));
        Self {
            browser,
            dispatcher: Mutex::new(Arc::new(dispatcher)),
            backend: Mutex::new(None),
            history: Mutex::new(None),
            session: TokioMutex::new(SessionStore::new()),
            upload: Mutex::new(UploadOptions::default()),
            conversation: Mutex::new(Vec::new()),
            view: Mutex::new(View::default()),
        }
    }

    /// Configure the backend and dispatcher from saved settings.
    pub fn apply_settings(&self, settings: &Settings) {
        self.configure_backend(Arc::new(HttpBackend::new(settings.backend_url.clone())));
        self.set_search_template(&settings.search_template);
        *lock(&self.upload) = settings.upload_options();
        log::info!("Assistant: settings applied (backend={})", settings.backend_url);
    }

    pub fn configure_backend(&self, backend: Arc<dyn AssistantBackend>) {
        log::info!("Assistant: backend {} configured", backend.name());
        *lock(&self.backend) = Some(backend);
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.backend).is_some()
    }

    pub fn set_search_template(&self, template: &str) {
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&self.browser)).with_search_template(template);
        *lock(&self.dispatcher) = Arc::new(dispatcher);
    }

    pub fn set_upload_options(&self, opts: UploadOptions) {
        *lock(&self.upload) = opts;
    }

    /// Start recording activity for `user_id`.
    pub fn attach_history(&self, log: Arc<ActivityLog>, user_id: impl Into<String>) {
        *lock(&self.history) = Some(HistorySink {
            log,
            user_id: user_id.into(),
        });
    }

    pub fn detach_history(&self) {
        *lock(&self.history) = None;
    }

    pub fn view(&self) -> View {
        *lock(&self.view)
    }

    pub fn set_view(&self, view: View) {
        let mut current = lock(&self.view);
        if *current != view {
            log::debug!("Assistant: view {:?} -> {:?}", *current, view);
            *current = view;
        }
    }

    fn backend(&self) -> Result<Arc<dyn AssistantBackend>, AiError> {
        lock(&self.backend)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| AiError::ConnectionError("Backend not configured".into()))
    }

    fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&lock(&self.dispatcher))
    }

    /// Run a directive the caller already has.
    pub async fn execute(&self, directive: &BackendDirective) -> CommandResult {
        let result = self.dispatcher().execute(directive).await;
        self.record_activity(
            ActivityKind::ExecuteCommand,
            json!({
                "action": directive.action.to_string(),
                "value": directive.value,
                "succeeded": result.succeeded,
                "message": result.message,
            }),
        )
        .await;
        result
    }

    /// Send a typed or spoken command to the backend, then either run the
    /// directive it returns or hand back its answer.
    pub async fn run_command(
        &self,
        text: &str,
        source: CommandSource,
    ) -> Result<CommandOutcome, AiError> {
        let backend = self.backend()?;
        log::info!("Assistant: {:?} command: {}", source, text);

        if source == CommandSource::Voice {
            self.record_activity(ActivityKind::VoiceCommand, json!({ "transcript": text }))
                .await;
        }

        match backend.interpret(text).await? {
            BackendReply::Directive(directive) => Ok(CommandOutcome::Executed {
                result: self.execute(&directive).await,
            }),
            BackendReply::Answer { response } => Ok(CommandOutcome::Answered { text: response }),
        }
    }

    /// Capture the active tab into the session.
    pub async fn capture_to_session(&self) -> Result<(CapturedImage, usize), BrowserError> {
        let (image, total) = session::add_active_tab(self.browser.as_ref(), &self.session).await?;
        log::info!("Assistant: captured {} ({} in session)", image.source_title, total);

        let kind = if total > 1 {
            ActivityKind::MultiCapture
        } else {
            ActivityKind::CaptureScreenshot
        };
        self.record_activity(
            kind,
            json!({ "url": image.source_url, "title": image.source_title, "total": total }),
        )
        .await;
        Ok((image, total))
    }

    pub async fn session(&self) -> Vec<CapturedImage> {
        self.session.lock().await.list().to_vec()
    }

    /// Remove one capture; returns the remaining count.
    pub async fn remove_from_session(&self, id: i64) -> usize {
        let mut store = self.session.lock().await;
        store.remove(id);
        store.len()
    }

    pub async fn clear_session(&self) {
        self.session.lock().await.clear();
        log::info!("Assistant: session cleared");
    }

    /// Ask the backend about every image in the session. The exchange is
    /// added to the conversation only once the backend has answered.
    pub async fn ask(&self, prompt: &str) -> Result<String, AiError> {
        let backend = self.backend()?;
        let images = self.upload_payloads().await?;
        if images.is_empty() {
            return Err(AiError::EmptyRequest(
                "capture at least one tab before asking".into(),
            ));
        }

        let answer = backend.analyze(prompt, &images).await?;
        self.push_conversation(Role::User, prompt, images.len());
        self.push_conversation(Role::Assistant, &answer, 0);

        self.record_activity(
            ActivityKind::AnalyzeScreen,
            json!({ "prompt": prompt, "images": images.len() }),
        )
        .await;
        Ok(answer)
    }

    pub fn conversation(&self) -> Vec<ConversationEntry> {
        lock(&self.conversation).clone()
    }

    pub fn clear_conversation(&self) {
        lock(&self.conversation).clear();
    }

    /// Session images as bare base64 JPEG, oldest first. Encoding runs off
    /// the async workers with the session unlocked. A capture that cannot
    /// be re-encoded is sent as captured.
    async fn upload_payloads(&self) -> Result<Vec<String>, AiError> {
        let opts = *lock(&self.upload);
        let images = self.session.lock().await.list().to_vec();
        if images.is_empty() {
            return Ok(Vec::new());
        }
        tokio::task::spawn_blocking(move || encode_all(&images, opts))
            .await
            .map_err(|e| AiError::ImagePreparation(e.to_string()))
    }

    fn push_conversation(&self, role: Role, content: &str, image_count: usize) {
        lock(&self.conversation).push(ConversationEntry {
            role,
            content: content.to_string(),
            timestamp: now_iso(),
            image_count,
        });
    }

    /// Record activity for the signed-in user, if any. Best effort:
    /// failures are logged and never reach the caller.
    pub async fn record_activity(&self, kind: ActivityKind, data: Value) {
        let sink = lock(&self.history)
            .as_ref()
            .map(|s| (Arc::clone(&s.log), s.user_id.clone()));
        let Some((activity, user_id)) = sink else {
            return;
        };
        if let Err(e) = activity.log_activity(&user_id, kind, &data).await {
            log::warn!("Assistant: failed to record {}: {}", kind, e);
        }
    }
}

fn encode_all(images: &[CapturedImage], opts: UploadOptions) -> Vec<String> {
    images
        .iter()
        .map(|img| match prepare_for_upload(&img.image_data, opts) {
            Ok(b64) => b64,
            Err(e) => {
                log::warn!("Assistant: sending capture {} unprocessed: {}", img.id, e);
                strip_data_url(&img.image_data).to_string()
            }
        })
        .collect()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{TabInfo, TabQuery};
    use async_trait::async_trait;

    struct NoBrowser;

    #[async_trait]
    impl BrowserApi for NoBrowser {
        async fn query_tabs(&self, _: TabQuery) -> Result<Vec<TabInfo>, BrowserError> {
            Err(BrowserError::Disconnected)
        }
        async fn activate_tab(&self, _: i64) -> Result<(), BrowserError> {
            Err(BrowserError::Disconnected)
        }
        async fn create_tab(&self, _: &str) -> Result<TabInfo, BrowserError> {
            Err(BrowserError::Disconnected)
        }
        async fn capture_visible_tab(&self, _: i64) -> Result<String, BrowserError> {
            Err(BrowserError::Disconnected)
        }
    }

    #[test]
    fn assistant_starts_unconfigured() {
        let a = Assistant::new(Arc::new(NoBrowser));
        assert!(!a.is_configured());
        assert_eq!(a.view(), View::Command);
    }

    #[test]
    fn apply_settings_configures_backend() {
        let a = Assistant::new(Arc::new(NoBrowser));
        a.apply_settings(&Settings::default());
        assert!(a.is_configured());
    }

    #[test]
    fn view_transitions() {
        let a = Assistant::new(Arc::new(NoBrowser));
        a.set_view(View::Chat);
        assert_eq!(a.view(), View::Chat);
        a.set_view(View::Settings);
        assert_eq!(a.view(), View::Settings);
    }

    #[tokio::test]
    async fn command_without_backend_fails() {
        let a = Assistant::new(Arc::new(NoBrowser));
        let err = a.run_command("switch to gmail", CommandSource::Typed).await.unwrap_err();
        assert_eq!(err.to_string(), "Connection failed: Backend not configured");
    }

    #[tokio::test]
    async fn disconnected_browser_surfaces_as_failed_result() {
        let a = Assistant::new(Arc::new(NoBrowser));
        let result = a
            .execute(&BackendDirective::new(
                crate::dispatcher::DirectiveAction::Capture,
                None,
            ))
            .await;
        assert!(!result.succeeded);
        assert_eq!(
            result.message,
            "Failed to capture screen: Browser runtime disconnected"
        );
    }

    #[test]
    fn now_iso_format() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
