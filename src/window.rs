//! Overlay window control
//!
//! The controller is the only component allowed to mutate the overlay
//! window. Everything platform specific sits behind [`OverlayWindow`] and
//! [`WindowBackend`] so the mode state machine can run against a fake.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Always-on-top level requested for the overlay
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WindowLevel {
    Normal,
    Floating,
    #[default]
    ScreenSaver,
}

/// How the overlay treats pointer input
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// The overlay consumes all input.
    Accept,
    /// Clicks pass through to whatever is beneath; moves still reach the content layer.
    Forward,
}

/// Identity of one overlay window instance. Never reused within a process.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

impl WindowId {
    pub fn label(&self) -> String {
        format!("{}{}", OVERLAY_LABEL_PREFIX, self.0)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        label
            .strip_prefix(OVERLAY_LABEL_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(WindowId)
    }
}

const OVERLAY_LABEL_PREFIX: &str = "desktop_overlay_";

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1280.0,
            height: 800.0,
        }
    }
}

/// Everything the backend needs to build a (hidden) overlay window
#[derive(Debug, Clone)]
pub struct OverlaySpec {
    pub id: WindowId,
    pub bounds: Bounds,
    pub level: WindowLevel,
    /// Cosmetic only. Creation must succeed without it.
    pub icon: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("overlay window has been destroyed")]
    Destroyed,
    #[error("window asset unavailable: {0}")]
    Asset(String),
    #[error("window operation failed: {0}")]
    Platform(String),
}

/// Window-state changes reported by the platform for an overlay window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEventKind {
    Hidden,
    Minimized,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayEvent {
    pub window: WindowId,
    pub kind: OverlayEventKind,
}

/// Operations on a live overlay window
pub trait OverlayWindow {
    fn id(&self) -> WindowId;
    fn is_destroyed(&self) -> bool;
    fn set_transparent_background(&self) -> Result<(), WindowError>;
    fn set_visible_on_all_workspaces(&self, visible: bool) -> Result<(), WindowError>;
    fn set_level(&self, level: WindowLevel) -> Result<(), WindowError>;
    fn is_always_on_top(&self) -> Result<bool, WindowError>;
    fn is_visible(&self) -> Result<bool, WindowError>;
    fn is_minimized(&self) -> Result<bool, WindowError>;
    fn show(&self) -> Result<(), WindowError>;
    fn restore(&self) -> Result<(), WindowError>;
    fn set_input_mode(&self, mode: InputMode) -> Result<(), WindowError>;
    fn close(&self) -> Result<(), WindowError>;
}

/// Platform window system: overlay factory plus the primary window
pub trait WindowBackend {
    type Overlay: OverlayWindow;

    fn primary_display_bounds(&self) -> Option<Bounds>;
    /// Build the overlay window without showing it.
    fn create_overlay(&self, spec: &OverlaySpec) -> Result<Self::Overlay, WindowError>;
    fn main_exists(&self) -> bool;
    fn create_main(&self) -> Result<(), WindowError>;
    fn hide_main(&self) -> Result<(), WindowError>;
    /// Show the primary window, raise it and request input focus.
    fn show_main(&self) -> Result<(), WindowError>;
}

/// Owner of the overlay window handle
pub struct OverlayController<W> {
    window: Option<W>,
    level: WindowLevel,
    next_id: u64,
}

impl<W: OverlayWindow> OverlayController<W> {
    pub fn new(level: WindowLevel) -> Self {
        Self {
            window: None,
            level,
            next_id: 1,
        }
    }

    pub fn level(&self) -> WindowLevel {
        self.level
    }

    pub fn window(&self) -> Option<&W> {
        self.window.as_ref()
    }

    pub fn current_id(&self) -> Option<WindowId> {
        self.window.as_ref().map(|w| w.id())
    }

    /// Whether a window exists and the platform has not destroyed it
    pub fn is_live(&self) -> bool {
        self.window.as_ref().is_some_and(|w| !w.is_destroyed())
    }

    /// Create, configure and show a new overlay window.
    ///
    /// Background, workspace visibility, level and pass-through are all
    /// applied before the first `show`. A missing icon degrades to a window
    /// without one.
    pub fn create<B>(
        &mut self,
        backend: &B,
        bounds: Bounds,
        icon: Option<PathBuf>,
    ) -> Result<WindowId, WindowError>
    where
        B: WindowBackend<Overlay = W>,
    {
        if let Some(stale) = self.window.take() {
            log::warn!("Replacing existing overlay window {:?}", stale.id());
            close_logged(&stale);
        }

        let mut spec = OverlaySpec {
            id: WindowId(self.next_id),
            bounds,
            level: self.level,
            icon,
        };
        self.next_id += 1;

        let window = match backend.create_overlay(&spec) {
            Ok(window) => window,
            Err(WindowError::Asset(asset)) => {
                log::warn!("Overlay asset unavailable ({}), creating without it", asset);
                spec.icon = None;
                backend.create_overlay(&spec)?
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = configure_before_show(&window, self.level) {
            log::error!("Failed to configure overlay window: {}", e);
            close_logged(&window);
            return Err(e);
        }

        if let Err(e) = window.show() {
            log::error!("Failed to show overlay window: {}", e);
            close_logged(&window);
            return Err(e);
        }

        log::info!("Overlay window {:?} created at {:?}", spec.id, bounds);
        self.window = Some(window);
        Ok(spec.id)
    }

    /// Show an existing overlay that was hidden. Returns whether it had to be shown.
    pub fn show_existing(&self) -> Result<bool, WindowError> {
        let window = self.live_window()?;
        if window.is_minimized()? {
            window.restore()?;
        }
        if window.is_visible()? {
            return Ok(false);
        }
        window.show()?;
        Ok(true)
    }

    /// Route input: `accept == false` forwards input to whatever is beneath.
    ///
    /// Safe at any time; a missing or destroyed window makes this a no-op.
    pub fn set_input_transparent(&self, accept: bool) {
        let Some(window) = self.window.as_ref().filter(|w| !w.is_destroyed()) else {
            log::debug!("Ignoring pass-through request (accept={}) without a live overlay", accept);
            return;
        };

        let mode = if accept {
            InputMode::Accept
        } else {
            InputMode::Forward
        };

        if let Err(e) = window.set_input_mode(mode) {
            log::warn!("Failed to set overlay input mode {:?}: {}", mode, e);
        }
    }

    /// Re-apply the always-on-top level and workspace visibility.
    pub fn reassert_topmost(&self) -> Result<(), WindowError> {
        let window = self.live_window()?;
        window.set_level(self.level)?;
        window.set_visible_on_all_workspaces(true)
    }

    /// Show the window if the platform hid it. Returns whether it was reshown.
    pub fn ensure_visible(&self) -> Result<bool, WindowError> {
        let window = self.live_window()?;
        if window.is_visible()? {
            return Ok(false);
        }
        window.show()?;
        Ok(true)
    }

    /// Re-apply the level if the topmost flag was revoked. Returns whether it was re-applied.
    pub fn ensure_topmost(&self) -> Result<bool, WindowError> {
        let window = self.live_window()?;
        let wanted = self.level != WindowLevel::Normal;
        if window.is_always_on_top()? == wanted {
            return Ok(false);
        }
        window.set_level(self.level)?;
        Ok(true)
    }

    pub fn reassert_workspaces(&self) -> Result<(), WindowError> {
        self.live_window()?.set_visible_on_all_workspaces(true)
    }

    /// Close the overlay window. The returned id is the "closed" signal.
    pub fn destroy(&mut self) -> Option<WindowId> {
        let window = self.window.take()?;
        let id = window.id();
        if !window.is_destroyed() {
            close_logged(&window);
        }
        log::info!("Overlay window {:?} destroyed", id);
        Some(id)
    }

    /// Drop the handle after the platform closed the window on its own.
    pub fn forget(&mut self, id: WindowId) -> bool {
        if self.current_id() == Some(id) {
            self.window = None;
            true
        } else {
            false
        }
    }

    /// Undo a hide/minimize that the user did not ask for.
    pub fn handle_event(&self, kind: OverlayEventKind, overlay_mode: bool) {
        if !overlay_mode {
            return;
        }
        let Ok(window) = self.live_window() else {
            return;
        };

        let result = match kind {
            OverlayEventKind::Hidden => window.show(),
            OverlayEventKind::Minimized => window.restore(),
            OverlayEventKind::Closed => Ok(()),
        };

        match result {
            Ok(()) => log::debug!("Overlay {:?} recovered from {:?}", window.id(), kind),
            Err(e) => log::warn!("Failed to recover overlay from {:?}: {}", kind, e),
        }
    }

    fn live_window(&self) -> Result<&W, WindowError> {
        self.window
            .as_ref()
            .filter(|w| !w.is_destroyed())
            .ok_or(WindowError::Destroyed)
    }
}

fn close_logged<W: OverlayWindow>(window: &W) {
    if let Err(e) = window.close() {
        log::warn!("Failed to close overlay window {:?}: {}", window.id(), e);
    }
}

fn configure_before_show<W: OverlayWindow>(
    window: &W,
    level: WindowLevel,
) -> Result<(), WindowError> {
    window.set_transparent_background()?;
    window.set_visible_on_all_workspaces(true)?;
    window.set_level(level)?;
    window.set_input_mode(InputMode::Forward)
}


#[cfg(test)]
mod tests {
    use super::fake::FakeBackend;
    use super::*;

    fn created() -> (FakeBackend, OverlayController<fake::FakeOverlay>) {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        controller
            .create(&backend, Bounds::default(), None)
            .unwrap();
        (backend, controller)
    }

    #[test]
    fn test_properties_applied_before_show() {
        let (backend, _controller) = created();
        let overlay = backend.last_overlay().unwrap();
        let log = overlay.log.borrow().clone();

        let show_at = log.iter().position(|s| *s == "show").unwrap();
        for property in ["background", "workspaces", "level", "input"] {
            let at = log.iter().position(|s| *s == property).unwrap();
            assert!(at < show_at, "{} applied after show: {:?}", property, log);
        }

        let state = overlay.snapshot();
        assert!(state.transparent);
        assert!(state.all_workspaces);
        assert_eq!(state.level, Some(WindowLevel::ScreenSaver));
        assert_eq!(state.input, Some(InputMode::Forward));
        assert!(state.visible);
    }

    #[test]
    fn test_missing_icon_degrades() {
        let backend = FakeBackend::new();
        backend.icon_missing.set(true);
        let mut controller = OverlayController::new(WindowLevel::Floating);

        let id = controller
            .create(&backend, Bounds::default(), Some(PathBuf::from("icons/overlay.png")))
            .unwrap();

        let overlay = backend.last_overlay().unwrap();
        assert_eq!(overlay.id, id);
        assert!(!overlay.snapshot().icon);
        assert!(controller.is_live());
    }

    #[test]
    fn test_window_ids_are_not_reused() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        let first = controller.create(&backend, Bounds::default(), None).unwrap();
        controller.destroy();
        let second = controller.create(&backend, Bounds::default(), None).unwrap();
        assert_ne!(first, second);
        assert_ne!(first.label(), second.label());
        assert_eq!(WindowId::from_label(&second.label()), Some(second));
        assert_eq!(WindowId::from_label("main"), None);
    }

    #[test]
    fn test_input_transparency_toggles() {
        let (backend, controller) = created();
        let overlay = backend.last_overlay().unwrap();

        controller.set_input_transparent(true);
        assert_eq!(overlay.snapshot().input, Some(InputMode::Accept));

        controller.set_input_transparent(false);
        assert_eq!(overlay.snapshot().input, Some(InputMode::Forward));
    }

    #[test]
    fn test_input_transparency_noop_when_destroyed() {
        let (backend, mut controller) = created();
        let overlay = backend.last_overlay().unwrap();
        let before = overlay.calls.borrow().set_input;

        controller.destroy();
        controller.set_input_transparent(true);
        assert_eq!(overlay.calls.borrow().set_input, before);

        let empty: OverlayController<fake::FakeOverlay> =
            OverlayController::new(WindowLevel::Normal);
        empty.set_input_transparent(true);
    }

    #[test]
    fn test_reassert_topmost_is_idempotent() {
        let (backend, controller) = created();
        let overlay = backend.last_overlay().unwrap();
        let before = overlay.snapshot();

        controller.reassert_topmost().unwrap();
        controller.reassert_topmost().unwrap();

        assert_eq!(overlay.snapshot(), before);
        assert_eq!(overlay.calls.borrow().show, 1);
    }

    #[test]
    fn test_normal_level_is_not_relevelled() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::Normal);
        controller.create(&backend, Bounds::default(), None).unwrap();
        let overlay = backend.last_overlay().unwrap();
        let levels = overlay.calls.borrow().set_level;

        assert!(!controller.ensure_topmost().unwrap());
        assert!(!controller.ensure_topmost().unwrap());
        assert_eq!(overlay.calls.borrow().set_level, levels);

        // a window raised to topmost behind our back is put back
        overlay.state.borrow_mut().level = Some(WindowLevel::Floating);
        assert!(controller.ensure_topmost().unwrap());
        assert_eq!(overlay.snapshot().level, Some(WindowLevel::Normal));
    }

    #[test]
    fn test_replacing_overlay_survives_failed_close() {
        let (backend, mut controller) = created();
        let stale = backend.last_overlay().unwrap();
        stale.fail_close.set(true);

        let id = controller.create(&backend, Bounds::default(), None).unwrap();
        assert_eq!(stale.calls.borrow().close, 1);
        assert_ne!(stale.id, id);
        assert_eq!(controller.current_id(), Some(id));
        assert!(controller.is_live());
    }

    #[test]
    fn test_hide_and_minimize_are_undone_in_overlay_mode() {
        let (backend, controller) = created();
        let overlay = backend.last_overlay().unwrap();

        overlay.state.borrow_mut().visible = false;
        controller.handle_event(OverlayEventKind::Hidden, true);
        assert!(overlay.snapshot().visible);

        overlay.state.borrow_mut().minimized = true;
        controller.handle_event(OverlayEventKind::Minimized, true);
        assert!(!overlay.snapshot().minimized);

        overlay.state.borrow_mut().visible = false;
        controller.handle_event(OverlayEventKind::Hidden, false);
        assert!(!overlay.snapshot().visible);
    }

    #[test]
    fn test_destroy_reports_closed_window() {
        let (backend, mut controller) = created();
        let id = controller.current_id().unwrap();

        assert_eq!(controller.destroy(), Some(id));
        assert!(backend.last_overlay().unwrap().snapshot().destroyed);
        assert_eq!(controller.destroy(), None);
        assert!(!controller.is_live());
    }

    #[test]
    fn test_show_existing_after_hide() {
        let (backend, controller) = created();
        let overlay = backend.last_overlay().unwrap();

        assert!(!controller.show_existing().unwrap());
        overlay.state.borrow_mut().visible = false;
        assert!(controller.show_existing().unwrap());
        assert!(overlay.snapshot().visible);
    }
}
