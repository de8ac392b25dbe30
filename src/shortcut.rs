//! Global shortcut for toggling the desktop widgets

use tauri::{AppHandle, Manager};
use tauri_plugin_global_shortcut::{GlobalShortcutExt, Shortcut, ShortcutState};

use crate::host::{HostEvent, HostHandle};

pub const DEFAULT_SHORTCUT: &str = "ctrl+shift+d";

pub fn init_shortcut(app: &AppHandle, shortcut_str: &str) -> Result<(), String> {
    let shortcut: Shortcut = shortcut_str
        .parse()
        .map_err(|e| format!("Failed to parse shortcut '{}': {}", shortcut_str, e))?;

    if app.global_shortcut().is_registered(shortcut) {
        log::warn!("Shortcut '{}' is already registered", shortcut_str);
        return Ok(());
    }

    app.global_shortcut()
        .on_shortcut(shortcut, move |app_handle, _shortcut, event| {
            handle_shortcut_event(app_handle, event.state);
        })
        .map_err(|e| format!("Failed to register shortcut '{}': {}", shortcut_str, e))?;

    log::info!("Registered global shortcut: '{}'", shortcut_str);
    Ok(())
}

fn handle_shortcut_event(app: &AppHandle, state: ShortcutState) {
    if let ShortcutState::Released = state {
        return;
    }

    let host = match app.try_state::<HostHandle>() {
        Some(host) => host,
        None => {
            log::error!("Host loop not found in app state");
            return;
        }
    };

    log::debug!("Shortcut pressed - toggling desktop widgets");
    if let Err(e) = host.send(HostEvent::Toggle) {
        log::error!("Failed to toggle desktop widgets: {}", e);
    }
}

pub fn cleanup_shortcut(app: &AppHandle, shortcut_str: &str) {
    if let Ok(shortcut) = shortcut_str.parse::<Shortcut>() {
        let _ = app.global_shortcut().unregister(shortcut);
        log::debug!("Unregistered global shortcut: '{}'", shortcut_str);
    }
}
