// shell.rs — Tauri host for the side panel.
//
// Plays the part of the extension's background context: owns the
// assistant, the browser bridge and the wake-word listener, and exposes
// them as invokable commands. Browser API calls and speech recognition run
// in the web view; requests go out as events and answers come back in
// through `browser_reply` and `voice_event`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tauri::{AppHandle, Emitter, Manager};

use crate::accounts::{self, AccountsConnection, AccountsService, ActivityEntry, ActivityKind, User};
use crate::assistant::{Assistant, CommandOutcome, CommandSource, View};
use crate::browser::{BrowserReply, RuntimeBridge};
use crate::dispatcher::{BackendDirective, CommandResult};
use crate::session::CapturedImage;
use crate::settings::{Settings, SETTINGS_FILE};
use crate::tray;
use crate::voice::{
    spawn_listener, ListenerHandle, RecognitionError, RecognitionEvent, SpeechRecognizer,
    VoiceListener, VoiceNotification,
};

/// Payload emitted on `session:updated` and returned by `add_tab_to_session`.
#[derive(Clone, Serialize)]
pub struct SessionAddedPayload {
    pub screenshot: CapturedImage,
    pub total: usize,
}

pub struct SettingsState {
    path: PathBuf,
    current: Mutex<Settings>,
}

pub struct VoiceState {
    handle: ListenerHandle,
    enabled: AtomicBool,
}

impl VoiceState {
    /// Flip wake-word listening on/off. Returns the new state.
    pub fn toggle(&self) -> bool {
        let was = self.enabled.fetch_xor(true, Ordering::SeqCst);
        if was {
            self.handle.stop();
        } else {
            self.handle.start();
        }
        !was
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        if on {
            self.handle.start();
        } else {
            self.handle.stop();
        }
    }
}

pub struct AccountsState {
    connection: AccountsConnection,
    user: Mutex<Option<User>>,
}

impl AccountsState {
    fn sign_out_locally(&self, assistant: &Assistant) {
        assistant.detach_history();
        *self.user.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn user_id(&self) -> Result<String, String> {
        self.user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or_else(|| accounts::AccountsError::NotSignedIn.to_string())
    }
}

/// Speech recognition lives in the web view (Web Speech API); starting and
/// stopping it is a request sent over events.
struct WebviewRecognizer {
    app: AppHandle,
}

#[async_trait]
impl SpeechRecognizer for WebviewRecognizer {
    async fn start(&self) -> Result<(), RecognitionError> {
        self.app
            .emit("voice:start-recognition", ())
            .map_err(|e| RecognitionError::Other(e.to_string()))
    }

    async fn stop(&self) {
        if let Err(e) = self.app.emit("voice:stop-recognition", ()) {
            log::error!("Failed to emit voice:stop-recognition: {}", e);
        }
    }
}

// ── commands: browser + session ─────────────────────────────────────────

#[tauri::command]
async fn execute_dynamic_command(
    assistant: tauri::State<'_, Arc<Assistant>>,
    command: BackendDirective,
) -> Result<CommandResult, String> {
    Ok(assistant.execute(&command).await)
}

#[tauri::command]
async fn run_command(
    assistant: tauri::State<'_, Arc<Assistant>>,
    text: String,
    source: CommandSource,
) -> Result<CommandOutcome, String> {
    assistant
        .run_command(&text, source)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn add_tab_to_session(
    assistant: tauri::State<'_, Arc<Assistant>>,
    app_handle: AppHandle,
) -> Result<SessionAddedPayload, String> {
    let (screenshot, total) = assistant
        .capture_to_session()
        .await
        .map_err(|e| e.to_string())?;
    let payload = SessionAddedPayload { screenshot, total };
    let _ = app_handle.emit("session:updated", payload.clone());
    Ok(payload)
}

#[tauri::command]
async fn get_session(
    assistant: tauri::State<'_, Arc<Assistant>>,
) -> Result<Vec<CapturedImage>, String> {
    Ok(assistant.session().await)
}

#[tauri::command]
async fn remove_from_session(
    assistant: tauri::State<'_, Arc<Assistant>>,
    id: i64,
) -> Result<usize, String> {
    Ok(assistant.remove_from_session(id).await)
}

#[tauri::command]
async fn clear_session(assistant: tauri::State<'_, Arc<Assistant>>) -> Result<(), String> {
    assistant.clear_session().await;
    Ok(())
}

#[tauri::command]
async fn ask_about_session(
    assistant: tauri::State<'_, Arc<Assistant>>,
    prompt: String,
) -> Result<String, String> {
    assistant.ask(&prompt).await.map_err(|e| e.to_string())
}

#[tauri::command]
fn set_view(assistant: tauri::State<'_, Arc<Assistant>>, view: View) {
    assistant.set_view(view);
}

#[tauri::command]
fn get_view(assistant: tauri::State<'_, Arc<Assistant>>) -> View {
    assistant.view()
}

/// Answer from the web view for a `browser:request` event.
#[tauri::command]
fn browser_reply(bridge: tauri::State<'_, Arc<RuntimeBridge>>, id: u64, reply: BrowserReply) -> bool {
    bridge.resolve(id, reply)
}

// ── commands: voice ─────────────────────────────────────────────────────

#[tauri::command]
fn voice_event(voice: tauri::State<'_, VoiceState>, event: RecognitionEvent) {
    voice.handle.feed(event);
}

#[tauri::command]
fn set_wake_word_enabled(voice: tauri::State<'_, VoiceState>, enabled: bool) {
    voice.set(enabled);
}

#[tauri::command]
fn toggle_wake_word(voice: tauri::State<'_, VoiceState>) -> bool {
    voice.toggle()
}

// ── commands: settings ──────────────────────────────────────────────────

#[tauri::command]
fn load_settings(settings: tauri::State<'_, SettingsState>) -> Settings {
    settings
        .current
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

#[tauri::command]
async fn save_settings(
    state: tauri::State<'_, SettingsState>,
    assistant: tauri::State<'_, Arc<Assistant>>,
    voice: tauri::State<'_, VoiceState>,
    accounts_state: tauri::State<'_, AccountsState>,
    settings: Settings,
) -> Result<(), String> {
    settings.save(&state.path).map_err(|e| e.to_string())?;
    assistant.apply_settings(&settings);
    voice.handle.set_agent_name(settings.agent_name.clone());
    voice.handle.set_retry_policy(settings.retry_policy());
    voice.set(settings.wake_word_enabled);

    let rebuilt = accounts_state
        .connection
        .reconfigure(&settings.appwrite)
        .map_err(|e| e.to_string())?;
    if rebuilt {
        // The old client carried the session cookie.
        accounts_state.sign_out_locally(&assistant);
    }

    assistant
        .record_activity(
            ActivityKind::SettingsChange,
            json!({
                "agentName": settings.agent_name,
                "wakeWordEnabled": settings.wake_word_enabled,
            }),
        )
        .await;
    *state.current.lock().unwrap_or_else(|e| e.into_inner()) = settings;
    Ok(())
}

// ── commands: accounts + history ────────────────────────────────────────

fn signed_in(state: &AccountsState, assistant: &Assistant, user: User) -> User {
    assistant.attach_history(state.connection.history(), user.id.clone());
    *state.user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
    user
}

#[tauri::command]
async fn sign_up(
    state: tauri::State<'_, AccountsState>,
    assistant: tauri::State<'_, Arc<Assistant>>,
    email: String,
    password: String,
    name: String,
) -> Result<User, String> {
    let user = accounts::sign_up(state.connection.service().as_ref(), &email, &password, &name)
        .await
        .map_err(|e| e.to_string())?;
    Ok(signed_in(&state, &assistant, user))
}

#[tauri::command]
async fn sign_in(
    state: tauri::State<'_, AccountsState>,
    assistant: tauri::State<'_, Arc<Assistant>>,
    email: String,
    password: String,
) -> Result<User, String> {
    let user = accounts::sign_in(state.connection.service().as_ref(), &email, &password)
        .await
        .map_err(|e| e.to_string())?;
    Ok(signed_in(&state, &assistant, user))
}

#[tauri::command]
async fn current_user(
    state: tauri::State<'_, AccountsState>,
    assistant: tauri::State<'_, Arc<Assistant>>,
) -> Result<User, String> {
    let service = state.connection.service();
    let user = service.current_user().await.map_err(|e| e.to_string())?;
    Ok(signed_in(&state, &assistant, user))
}

#[tauri::command]
async fn sign_out(
    state: tauri::State<'_, AccountsState>,
    assistant: tauri::State<'_, Arc<Assistant>>,
) -> Result<(), String> {
    let service = state.connection.service();
    service.logout().await.map_err(|e| e.to_string())?;
    state.sign_out_locally(&assistant);
    Ok(())
}

#[tauri::command]
async fn get_history(
    state: tauri::State<'_, AccountsState>,
    limit: Option<u32>,
) -> Result<Vec<ActivityEntry>, String> {
    let user_id = state.user_id()?;
    state
        .connection
        .history()
        .user_history(&user_id, limit.unwrap_or(accounts::history::DEFAULT_HISTORY_LIMIT))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn delete_activity(state: tauri::State<'_, AccountsState>, id: String) -> Result<(), String> {
    state
        .connection
        .history()
        .delete_activity(&id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn clear_history(state: tauri::State<'_, AccountsState>) -> Result<usize, String> {
    let user_id = state.user_id()?;
    state
        .connection
        .history()
        .clear_user_history(&user_id)
        .await
        .map_err(|e| e.to_string())
}

// ── wiring ──────────────────────────────────────────────────────────────

fn config_path(app: &AppHandle) -> Result<PathBuf, String> {
    let dir = app.path().app_config_dir().map_err(|e| e.to_string())?;
    Ok(dir.join(SETTINGS_FILE))
}

/// Forward wake/sleep and status notifications to the panel.
async fn pump_notifications(
    app: AppHandle,
    mut notes: tokio::sync::mpsc::UnboundedReceiver<VoiceNotification>,
) {
    while let Some(note) = notes.recv().await {
        match &note {
            VoiceNotification::Wake => {
                log::info!("Wake word: opening panel");
                tray::show_panel(&app);
                let _ = app.emit("voice:wake", ());
                let assistant = Arc::clone(app.state::<Arc<Assistant>>().inner());
                let agent_name = app
                    .state::<SettingsState>()
                    .current
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .agent_name
                    .clone();
                assistant
                    .record_activity(ActivityKind::WakeWord, json!({ "agentName": agent_name }))
                    .await;
            }
            VoiceNotification::Sleep => {
                log::info!("Sleep word: closing panel");
                if let Some(win) = app.get_webview_window("main") {
                    let _ = win.hide();
                }
                let _ = app.emit("voice:sleep", ());
            }
            VoiceNotification::PermanentFailure(reason) => {
                log::error!("Wake word listener stopped: {}", reason);
                app.state::<VoiceState>().enabled.store(false, Ordering::SeqCst);
                let _ = app.emit("voice:status", &note);
            }
            VoiceNotification::Status(_) => {
                let _ = app.emit("voice:status", &note);
            }
        }
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(
            tauri_plugin_global_shortcut::Builder::new()
                .with_handler(tray::on_shortcut_event)
                .build(),
        )
        .invoke_handler(tauri::generate_handler![
            execute_dynamic_command,
            run_command,
            add_tab_to_session,
            get_session,
            remove_from_session,
            clear_session,
            ask_about_session,
            set_view,
            get_view,
            browser_reply,
            voice_event,
            set_wake_word_enabled,
            toggle_wake_word,
            load_settings,
            save_settings,
            sign_up,
            sign_in,
            current_user,
            sign_out,
            get_history,
            delete_activity,
            clear_history,
        ])
        .setup(|app| {
            let handle = app.handle().clone();

            let path = config_path(&handle)?;
            let settings = Settings::load(&path).unwrap_or_else(|e| {
                log::warn!("Using default settings: {}", e);
                Settings::default()
            });

            // Browser bridge: drain requests into `browser:request` events.
            let (bridge, mut requests) = RuntimeBridge::new();
            let bridge = Arc::new(bridge);
            let emitter = handle.clone();
            tauri::async_runtime::spawn(async move {
                while let Some(req) = requests.recv().await {
                    if let Err(e) = emitter.emit("browser:request", &req) {
                        log::error!("Failed to emit browser:request: {}", e);
                    }
                }
            });

            let assistant = Arc::new(Assistant::new(bridge.clone()));
            assistant.apply_settings(&settings);

            let connection = AccountsConnection::new(settings.appwrite.clone())?;

            let listener = VoiceListener::new(settings.phrases(), settings.retry_policy());
            let recognizer = Arc::new(WebviewRecognizer {
                app: handle.clone(),
            });
            // The listener task needs the tokio runtime context.
            let (voice_handle, notes, _task) =
                tauri::async_runtime::block_on(async move { spawn_listener(listener, recognizer) });
            tauri::async_runtime::spawn(pump_notifications(handle.clone(), notes));

            let wake_enabled = settings.wake_word_enabled;
            app.manage(bridge);
            app.manage(assistant);
            app.manage(AccountsState {
                connection,
                user: Mutex::new(None),
            });
            app.manage(VoiceState {
                handle: voice_handle,
                enabled: AtomicBool::new(false),
            });
            app.manage(SettingsState {
                path,
                current: Mutex::new(settings),
            });

            if wake_enabled {
                app.state::<VoiceState>().set(true);
            }

            tray::setup_tray(app)?;

            use tauri_plugin_global_shortcut::GlobalShortcutExt;
            app.global_shortcut().register(tray::PANEL_SHORTCUT)?;
            log::info!("Global shortcut {} registered", tray::PANEL_SHORTCUT);

            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
