pub mod bridge;
pub mod content;
pub mod enforcer;
pub mod feed;
pub mod mode;
pub mod settings;
pub mod window;

#[cfg(feature = "desktop")]
mod commands;
#[cfg(feature = "desktop")]
mod host;
#[cfg(feature = "desktop")]
mod overlay;
#[cfg(feature = "desktop")]
mod shortcut;
#[cfg(feature = "desktop")]
mod tray;

#[cfg(feature = "desktop")]
use tauri::Manager;

#[cfg(feature = "desktop")]
fn handle_window_event(window: &tauri::Window, event: &tauri::WindowEvent) {
    use crate::host::{ContentInput, HostEvent, HostHandle};
    use crate::window::{OverlayEvent, OverlayEventKind, WindowId};
    use tauri::WindowEvent;

    let Some(host) = window.try_state::<HostHandle>() else {
        return;
    };

    let label = window.label();
    let host_event = if label == overlay::MAIN_WINDOW_LABEL {
        match event {
            WindowEvent::CloseRequested { api, .. } => {
                api.prevent_close();
                Some(HostEvent::MainCloseRequested)
            }
            WindowEvent::Focused(true) => Some(HostEvent::MainFocused),
            _ => None,
        }
    } else if let Some(id) = WindowId::from_label(label) {
        let overlay_event = |kind| Some(HostEvent::Overlay(OverlayEvent { window: id, kind }));
        match event {
            WindowEvent::Destroyed => overlay_event(OverlayEventKind::Closed),
            WindowEvent::Resized(_) if window.is_minimized().unwrap_or(false) => {
                overlay_event(OverlayEventKind::Minimized)
            }
            WindowEvent::Focused(false) => Some(HostEvent::Content {
                window: id,
                input: ContentInput::Blur,
            }),
            _ => None,
        }
    } else {
        None
    };

    if let Some(host_event) = host_event {
        if let Err(e) = host.send(host_event) {
            log::warn!("{}", e);
        }
    }
}

#[cfg(feature = "desktop")]
fn coordinator_config(
    app: &tauri::AppHandle,
    settings: &settings::AppSettings,
) -> mode::CoordinatorConfig {
    let icon = match app
        .path()
        .resolve("icons/icon.png", tauri::path::BaseDirectory::Resource)
    {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Overlay icon unavailable: {}", e);
            None
        }
    };

    mode::CoordinatorConfig {
        level: settings.window_level,
        enforcement_period: settings.enforcement_period(),
        icon,
    }
}

#[cfg(feature = "desktop")]
fn setup(app: &mut tauri::App) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("App starting up...");
    let settings = settings::get_settings(app.handle());
    log::info!(
        "Overlay feed at {}, polling every {}s",
        settings.api_base_url,
        settings.poll_interval_secs
    );

    let host = host::start(app.handle(), coordinator_config(app.handle(), &settings));
    app.manage(host);

    tray::create_tray(app.handle())
        .map_err(anyhow::Error::msg)
        .context("Failed to create tray menu")?;

    if let Err(e) = shortcut::init_shortcut(app.handle(), &settings.toggle_shortcut) {
        log::error!("Failed to initialize shortcut: {}", e);
        if settings.toggle_shortcut != shortcut::DEFAULT_SHORTCUT {
            if let Err(e) = shortcut::init_shortcut(app.handle(), shortcut::DEFAULT_SHORTCUT) {
                log::error!("Failed to initialize default shortcut: {}", e);
            }
        }
    }

    log::info!("App setup complete.");
    Ok(())
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_log::Builder::new()
            .level(log::LevelFilter::Info)
            .build())
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .plugin(tauri_plugin_store::Builder::new().build())
        .setup(|app| {
            setup(app)?;
            Ok(())
        })
        .on_window_event(handle_window_event)
        .invoke_handler(tauri::generate_handler![
            commands::toggle_desktop_widgets,
            commands::update_desktop_settings,
            commands::update_desktop_colors,
            commands::get_overlay_state,
            commands::overlay_ready,
            commands::overlay_pointer,
            commands::overlay_click,
            commands::overlay_rects,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|app_handle, event| {
        if let tauri::RunEvent::Exit = event {
            let settings = settings::get_settings(app_handle);
            shortcut::cleanup_shortcut(app_handle, &settings.toggle_shortcut);
        }
    });
}
