//! Tauri implementation of the overlay window backend

use log::debug;
use tauri::image::Image;
use tauri::window::Color;
use tauri::{AppHandle, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder};

use crate::window::{
    Bounds, InputMode, OverlaySpec, OverlayWindow, WindowBackend, WindowError, WindowId,
    WindowLevel,
};

pub const MAIN_WINDOW_LABEL: &str = "main";
const OVERLAY_PAGE: &str = "overlay.html";
const MAIN_WIDTH: f64 = 1200.0;
const MAIN_HEIGHT: f64 = 800.0;

fn platform(e: tauri::Error) -> WindowError {
    match e {
        tauri::Error::WindowNotFound | tauri::Error::WebviewNotFound => WindowError::Destroyed,
        other => WindowError::Platform(other.to_string()),
    }
}

/// A desktop overlay webview window
pub struct TauriOverlay {
    id: WindowId,
    window: WebviewWindow,
}

impl TauriOverlay {
    pub fn webview(&self) -> &WebviewWindow {
        &self.window
    }

    /// Cursor position in the overlay's CSS pixels, if the cursor is over it
    pub fn cursor_in_window(&self) -> Option<(f64, f64)> {
        let cursor = self.window.cursor_position().ok()?;
        let origin = self.window.inner_position().ok()?;
        let size = self.window.inner_size().ok()?;
        let scale = self.window.scale_factor().ok()?;

        let x = cursor.x - f64::from(origin.x);
        let y = cursor.y - f64::from(origin.y);
        if x < 0.0 || y < 0.0 || x >= f64::from(size.width) || y >= f64::from(size.height) {
            return None;
        }
        Some((x / scale, y / scale))
    }
}

impl OverlayWindow for TauriOverlay {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_destroyed(&self) -> bool {
        self.window
            .app_handle()
            .get_webview_window(&self.id.label())
            .is_none()
    }

    fn set_transparent_background(&self) -> Result<(), WindowError> {
        self.window
            .set_background_color(Some(Color(0, 0, 0, 0)))
            .map_err(platform)
    }

    fn set_visible_on_all_workspaces(&self, visible: bool) -> Result<(), WindowError> {
        self.window
            .set_visible_on_all_workspaces(visible)
            .map_err(platform)
    }

    fn set_level(&self, level: WindowLevel) -> Result<(), WindowError> {
        // Tauri exposes a single topmost flag; floating and screen-saver both map to it
        self.window
            .set_always_on_top(level != WindowLevel::Normal)
            .map_err(platform)
    }

    fn is_always_on_top(&self) -> Result<bool, WindowError> {
        self.window.is_always_on_top().map_err(platform)
    }

    fn is_visible(&self) -> Result<bool, WindowError> {
        self.window.is_visible().map_err(platform)
    }

    fn is_minimized(&self) -> Result<bool, WindowError> {
        self.window.is_minimized().map_err(platform)
    }

    fn show(&self) -> Result<(), WindowError> {
        self.window.show().map_err(platform)
    }

    fn restore(&self) -> Result<(), WindowError> {
        self.window.unminimize().map_err(platform)
    }

    fn set_input_mode(&self, mode: InputMode) -> Result<(), WindowError> {
        self.window
            .set_ignore_cursor_events(mode == InputMode::Forward)
            .map_err(platform)
    }

    fn close(&self) -> Result<(), WindowError> {
        self.window.destroy().map_err(platform)
    }
}

/// The app's windows as seen by the mode coordinator
pub struct TauriWindows {
    app: AppHandle,
}

impl TauriWindows {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }

    fn main_window(&self) -> Result<WebviewWindow, WindowError> {
        self.app
            .get_webview_window(MAIN_WINDOW_LABEL)
            .ok_or(WindowError::Destroyed)
    }
}

impl WindowBackend for TauriWindows {
    type Overlay = TauriOverlay;

    fn primary_display_bounds(&self) -> Option<Bounds> {
        let monitor = self.app.primary_monitor().ok().flatten()?;
        let scale = monitor.scale_factor();
        let position = monitor.position().to_logical::<f64>(scale);
        let size = monitor.size().to_logical::<f64>(scale);
        Some(Bounds {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        })
    }

    fn create_overlay(&self, spec: &OverlaySpec) -> Result<TauriOverlay, WindowError> {
        let label = spec.id.label();
        let mut builder =
            WebviewWindowBuilder::new(&self.app, &label, WebviewUrl::App(OVERLAY_PAGE.into()))
                .title("Desktop Widgets")
                .position(spec.bounds.x, spec.bounds.y)
                .inner_size(spec.bounds.width, spec.bounds.height)
                .resizable(false)
                .maximizable(false)
                .minimizable(false)
                .shadow(false)
                .transparent(true)
                .decorations(false)
                .skip_taskbar(true)
                .accept_first_mouse(true)
                .always_on_top(spec.level != WindowLevel::Normal)
                .visible(false)
                .focused(false);

        if let Some(path) = &spec.icon {
            let icon = Image::from_path(path)
                .map_err(|e| WindowError::Asset(format!("{}: {}", path.display(), e)))?;
            builder = builder
                .icon(icon)
                .map_err(|e| WindowError::Asset(e.to_string()))?;
        }

        let window = builder.build().map_err(platform)?;
        debug!("Desktop overlay window '{}' created", label);
        Ok(TauriOverlay {
            id: spec.id,
            window,
        })
    }

    fn main_exists(&self) -> bool {
        self.app.get_webview_window(MAIN_WINDOW_LABEL).is_some()
    }

    fn create_main(&self) -> Result<(), WindowError> {
        WebviewWindowBuilder::new(&self.app, MAIN_WINDOW_LABEL, WebviewUrl::default())
            .title("Ambient Academic Compass")
            .inner_size(MAIN_WIDTH, MAIN_HEIGHT)
            .build()
            .map_err(platform)?;
        debug!("Main window recreated");
        Ok(())
    }

    fn hide_main(&self) -> Result<(), WindowError> {
        self.main_window()?.hide().map_err(platform)
    }

    fn show_main(&self) -> Result<(), WindowError> {
        let window = self.main_window()?;
        window.show().map_err(platform)?;
        window.unminimize().map_err(platform)?;
        window.set_focus().map_err(platform)
    }
}
