// tray.rs — System tray icon + menu, and the global shortcut that opens the
// panel. The shortcut itself is registered in shell.rs via the plugin builder.

use std::sync::Arc;

use tauri::{
    menu::{Menu, MenuItem, PredefinedMenuItem},
    tray::TrayIconBuilder,
    AppHandle, Emitter, Manager,
};

use crate::assistant::{Assistant, View};
use crate::shell::{SessionAddedPayload, VoiceState};

pub const PANEL_SHORTCUT: &str = "ctrl+shift+k";

/// Show and focus the panel window.
pub fn show_panel(app: &AppHandle) {
    if let Some(win) = app.get_webview_window("main") {
        let _ = win.show();
        let _ = win.set_focus();
    }
}

/// Capture the active tab into the session and tell the panel.
fn capture_from_tray(app: &AppHandle) {
    let assistant = Arc::clone(app.state::<Arc<Assistant>>().inner());
    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        match assistant.capture_to_session().await {
            Ok((screenshot, total)) => {
                let _ = app.emit("session:updated", SessionAddedPayload { screenshot, total });
            }
            Err(e) => {
                log::error!("Tray: capture failed: {}", e);
                let _ = app.emit("session:error", e.to_string());
            }
        }
    });
}

// ─── Tray setup ──────────────────────────────────────────────────────

/// Call this from `App::setup` to create the system-tray icon and menu.
pub fn setup_tray(app: &tauri::App) -> Result<(), Box<dyn std::error::Error>> {
    let handle = app.handle();

    let capture_item = MenuItem::with_id(handle, "capture_tab", "Capture Tab", true, None::<&str>)?;
    let wake_label = if app.state::<VoiceState>().is_enabled() {
        "Stop Wake Word"
    } else {
        "Start Wake Word"
    };
    let wake_item = MenuItem::with_id(handle, "toggle_wake_word", wake_label, true, None::<&str>)?;
    let separator = PredefinedMenuItem::separator(handle)?;
    let panel_item = MenuItem::with_id(handle, "open_panel", "Open Panel", true, None::<&str>)?;
    let quit_item = MenuItem::with_id(handle, "quit", "Quit", true, None::<&str>)?;

    let menu = Menu::with_items(
        handle,
        &[&capture_item, &wake_item, &separator, &panel_item, &quit_item],
    )?;

    TrayIconBuilder::new()
        .menu(&menu)
        .show_menu_on_left_click(false)
        .on_menu_event(move |app_handle, event| match event.id().as_ref() {
            "capture_tab" => {
                log::info!("Tray: capturing active tab");
                capture_from_tray(app_handle);
            }
            "toggle_wake_word" => {
                let now_on = app_handle.state::<VoiceState>().toggle();
                log::info!("Tray: wake word → {}", if now_on { "ON" } else { "OFF" });

                if let Some(item) = menu.get("toggle_wake_word") {
                    if let Some(mi) = item.as_menuitem() {
                        let label = if now_on { "Stop Wake Word" } else { "Start Wake Word" };
                        let _ = mi.set_text(label);
                    }
                }
                let _ = app_handle.emit("voice:enabled", now_on);
            }
            "open_panel" => {
                log::info!("Tray: opening panel");
                show_panel(app_handle);
            }
            "quit" => {
                log::info!("Tray: quit requested");
                app_handle.exit(0);
            }
            _ => {}
        })
        .build(app)?;

    log::info!("System tray created");
    Ok(())
}

// ─── Global shortcut handler ─────────────────────────────────────────

/// Opens the panel on the command view when the shortcut goes down.
pub fn on_shortcut_event(
    app: &AppHandle,
    _shortcut: &tauri_plugin_global_shortcut::Shortcut,
    event: tauri_plugin_global_shortcut::ShortcutEvent,
) {
    if event.state() != tauri_plugin_global_shortcut::ShortcutState::Pressed {
        return;
    }

    log::info!("Shortcut {}: opening panel", PANEL_SHORTCUT);
    if let Some(assistant) = app.try_state::<Arc<Assistant>>() {
        assistant.set_view(View::Command);
    }
    show_panel(app);
    let _ = app.emit("panel:open", serde_json::json!({ "source": "shortcut", "view": View::Command }));
}
