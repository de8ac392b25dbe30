//! System tray management

use tauri::image::Image;
use tauri::menu::{Menu, MenuItem, PredefinedMenuItem};
use tauri::tray::{TrayIcon, TrayIconBuilder};
use tauri::{AppHandle, Manager};

use crate::host::{HostEvent, HostHandle};

const TRAY_ICON_PATH: &str = "icons/icon.png";

fn load_tray_icon(app: &AppHandle) -> Image<'static> {
    let loaded = app
        .path()
        .resolve(TRAY_ICON_PATH, tauri::path::BaseDirectory::Resource)
        .map_err(|e| format!("Failed to resolve icon path: {}", e))
        .and_then(|path| {
            Image::from_path(&path).map_err(|e| format!("Failed to load tray icon: {}", e))
        });

    match loaded {
        Ok(icon) => icon,
        Err(e) => {
            log::warn!("{}, using an empty tray icon", e);
            Image::new_owned(vec![0; 4], 1, 1)
        }
    }
}

/// Create the system tray icon and menu
pub fn create_tray(app: &AppHandle) -> Result<TrayIcon, String> {
    let menu = build_tray_menu(app)?;

    TrayIconBuilder::with_id("main")
        .icon(load_tray_icon(app))
        .tooltip("Ambient Academic Compass")
        .menu(&menu)
        .show_menu_on_left_click(false)
        .on_menu_event(handle_menu_event)
        .on_tray_icon_event(|tray, event| {
            if let tauri::tray::TrayIconEvent::Click { button, .. } = event {
                if button == tauri::tray::MouseButton::Left {
                    send(tray.app_handle(), HostEvent::ShowMain);
                }
            }
        })
        .build(app)
        .map_err(|e| format!("Failed to build tray icon: {}", e))
}

fn build_tray_menu(app: &AppHandle) -> Result<Menu<tauri::Wry>, String> {
    let show_item = MenuItem::with_id(app, "show_main", "Show Main Window", true, None::<&str>)
        .map_err(|e| format!("Failed to create menu item: {}", e))?;

    let toggle_item = MenuItem::with_id(
        app,
        "toggle_widgets",
        "Toggle Desktop Widgets",
        true,
        None::<&str>,
    )
    .map_err(|e| format!("Failed to create menu item: {}", e))?;

    let separator = PredefinedMenuItem::separator(app)
        .map_err(|e| format!("Failed to create separator: {}", e))?;

    let quit_item = MenuItem::with_id(app, "quit", "Quit", true, Some("Ctrl+Q"))
        .map_err(|e| format!("Failed to create menu item: {}", e))?;

    Menu::with_items(app, &[&show_item, &toggle_item, &separator, &quit_item])
        .map_err(|e| format!("Failed to create menu: {}", e))
}

fn send(app: &AppHandle, event: HostEvent) {
    match app.try_state::<HostHandle>() {
        Some(host) => {
            if let Err(e) = host.send(event) {
                log::error!("{}", e);
            }
        }
        None => log::error!("Host loop not found in app state"),
    }
}

/// Handle tray menu events
fn handle_menu_event(app: &AppHandle, event: tauri::menu::MenuEvent) {
    match event.id().as_ref() {
        "show_main" => {
            log::info!("Show main window requested from tray");
            send(app, HostEvent::ShowMain);
        }
        "toggle_widgets" => {
            log::info!("Desktop widgets toggled from tray");
            send(app, HostEvent::Toggle);
        }
        "quit" => {
            app.exit(0);
        }
        _ => {}
    }
}
