//! Tauri commands for the main window and the overlay webview

use tauri::{AppHandle, State, Window};

use crate::content::debounce::PointerKind;
use crate::content::dom::NodeId;
use crate::host::{ContentInput, ElementRect, HostEvent, HostHandle};
use crate::mode::ModeState;
use crate::settings::{self, ColorsPatch, SettingsPatch};

#[tauri::command]
pub fn toggle_desktop_widgets(host: State<HostHandle>) -> Result<(), String> {
    host.send(HostEvent::Toggle)
}

/// Persist the change, then push it to a live overlay
#[tauri::command]
pub fn update_desktop_settings(
    app: AppHandle,
    host: State<HostHandle>,
    settings: SettingsPatch,
) -> Result<(), String> {
    settings::update_setting(&app, |s| s.absorb(&settings))?;
    host.send(HostEvent::Settings(settings))
}

#[tauri::command]
pub fn update_desktop_colors(
    app: AppHandle,
    host: State<HostHandle>,
    colors: ColorsPatch,
) -> Result<(), String> {
    settings::update_setting(&app, |s| s.absorb_colors(&colors))?;
    host.send(HostEvent::Colors(colors))
}

#[tauri::command]
pub async fn get_overlay_state(host: State<'_, HostHandle>) -> Result<ModeState, String> {
    host.state().await
}

#[tauri::command]
pub fn overlay_ready(window: Window, host: State<HostHandle>) -> Result<(), String> {
    host.send_content(window.label(), ContentInput::Ready)
}

#[tauri::command]
pub fn overlay_pointer(
    window: Window,
    host: State<HostHandle>,
    node: NodeId,
    kind: PointerKind,
) -> Result<(), String> {
    host.send_content(window.label(), ContentInput::Pointer { node, kind })
}

#[tauri::command]
pub fn overlay_click(window: Window, host: State<HostHandle>, node: NodeId) -> Result<(), String> {
    host.send_content(window.label(), ContentInput::Click(node))
}

#[tauri::command]
pub fn overlay_rects(
    window: Window,
    host: State<HostHandle>,
    rects: Vec<ElementRect>,
) -> Result<(), String> {
    host.send_content(window.label(), ContentInput::Rects(rects))
}
