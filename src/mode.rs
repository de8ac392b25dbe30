//! Normal / overlay mode state machine
//!
//! One coordinator per process owns the overlay controller and the
//! enforcement timer. Nothing else flips the mode.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::enforcer::{enforce_ambient_visibility, EnforcementTimer, TimerStats};
use crate::window::{
    Bounds, OverlayController, OverlayEvent, OverlayEventKind, WindowBackend, WindowId,
    WindowLevel,
};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Overlay,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModeState {
    pub mode: Mode,
    pub enforcement_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Toggle command from tray, shortcut or main window
    Requested,
    /// The primary window took focus
    MainWindowFocused,
    /// The platform closed the overlay window
    OverlayClosed,
    /// Enforcement found the overlay window gone
    OverlayLost,
}

/// What a coordinator call changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    EnteredOverlay(WindowId),
    ExitedOverlay {
        window: Option<WindowId>,
        reason: ExitReason,
    },
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub level: WindowLevel,
    pub enforcement_period: Duration,
    pub icon: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            level: WindowLevel::ScreenSaver,
            enforcement_period: crate::enforcer::DEFAULT_ENFORCEMENT_PERIOD,
            icon: None,
        }
    }
}

pub struct ModeCoordinator<B: WindowBackend> {
    backend: B,
    overlay: OverlayController<B::Overlay>,
    timer: EnforcementTimer,
    mode: Mode,
    icon: Option<PathBuf>,
}

impl<B: WindowBackend> ModeCoordinator<B> {
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            overlay: OverlayController::new(config.level),
            timer: EnforcementTimer::new(config.enforcement_period),
            mode: Mode::Normal,
            icon: config.icon,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> ModeState {
        ModeState {
            mode: self.mode,
            enforcement_active: self.timer.is_running(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn overlay(&self) -> &OverlayController<B::Overlay> {
        &self.overlay
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.timer.stats()
    }

    /// The "toggle desktop widgets" command
    pub fn toggle(&mut self, now: Instant) -> Transition {
        match self.mode {
            Mode::Normal => self.enter_overlay(now),
            Mode::Overlay => self.exit_overlay(ExitReason::Requested),
        }
    }

    pub fn enter_overlay(&mut self, now: Instant) -> Transition {
        if self.mode == Mode::Overlay {
            return Transition::Unchanged;
        }

        if let Err(e) = self.backend.hide_main() {
            log::warn!("Failed to hide main window: {}", e);
        }

        let id = if self.overlay.is_live() {
            if let Err(e) = self.overlay.show_existing() {
                log::warn!("Failed to reshow overlay window: {}", e);
            }
            self.overlay.current_id()
        } else {
            let bounds = self.backend.primary_display_bounds().unwrap_or_default();
            match self.overlay.create(&self.backend, bounds, self.icon.clone()) {
                Ok(id) => Some(id),
                Err(e) => {
                    log::error!("Failed to create desktop overlay: {}", e);
                    None
                }
            }
        };

        let Some(id) = id else {
            self.restore_main();
            return Transition::Unchanged;
        };

        self.mode = Mode::Overlay;
        self.timer.start(now);
        self.check_invariant();
        log::info!("Entered desktop overlay mode ({:?})", id);
        Transition::EnteredOverlay(id)
    }

    pub fn exit_overlay(&mut self, reason: ExitReason) -> Transition {
        if self.mode == Mode::Normal {
            return Transition::Unchanged;
        }

        self.mode = Mode::Normal;
        self.timer.cancel();
        let window = self.overlay.destroy();
        self.restore_main();
        self.check_invariant();

        log::info!("Left desktop overlay mode ({:?})", reason);
        Transition::ExitedOverlay { window, reason }
    }

    /// Focus on the primary window means the user left the overlay.
    pub fn on_main_focused(&mut self) -> Transition {
        self.exit_overlay(ExitReason::MainWindowFocused)
    }

    pub fn on_overlay_event(&mut self, event: OverlayEvent) -> Transition {
        if self.overlay.current_id() != Some(event.window) {
            log::debug!("Ignoring {:?} for stale overlay {:?}", event.kind, event.window);
            return Transition::Unchanged;
        }

        match event.kind {
            OverlayEventKind::Closed => {
                self.overlay.forget(event.window);
                if self.mode == Mode::Overlay {
                    self.exit_overlay(ExitReason::OverlayClosed)
                } else {
                    Transition::Unchanged
                }
            }
            kind => {
                self.overlay.handle_event(kind, self.mode == Mode::Overlay);
                Transition::Unchanged
            }
        }
    }

    /// "Show Main Window": leaves overlay mode if needed, otherwise raises the main window
    pub fn show_main(&mut self) -> Transition {
        if self.mode == Mode::Overlay {
            return self.exit_overlay(ExitReason::Requested);
        }
        self.restore_main();
        Transition::Unchanged
    }

    /// The user closed the main window. Returns true when the app should quit;
    /// in overlay mode the close becomes a hide.
    pub fn on_main_close_requested(&self) -> bool {
        match self.mode {
            Mode::Normal => true,
            Mode::Overlay => {
                if let Err(e) = self.backend.hide_main() {
                    log::warn!("Failed to hide main window: {}", e);
                }
                false
            }
        }
    }

    /// Apply a pass-through request coming over the bridge
    pub fn set_input_transparent(&self, accept: bool) {
        if self.mode != Mode::Overlay {
            log::debug!("Ignoring pass-through request outside overlay mode");
            return;
        }
        self.overlay.set_input_transparent(accept);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_deadline()
    }

    /// Run a due enforcement tick, if any
    pub fn poll(&mut self, now: Instant) -> Transition {
        if self.mode != Mode::Overlay || !self.timer.take_due(now) {
            return Transition::Unchanged;
        }

        let report = enforce_ambient_visibility(&self.overlay);
        if report.destroyed {
            log::warn!("Overlay window disappeared while in overlay mode");
            return self.exit_overlay(ExitReason::OverlayLost);
        }
        Transition::Unchanged
    }

    fn restore_main(&self) {
        if !self.backend.main_exists() {
            if let Err(e) = self.backend.create_main() {
                log::error!("Failed to recreate main window: {}", e);
                return;
            }
        }
        if let Err(e) = self.backend.show_main() {
            log::warn!("Failed to show main window: {}", e);
        }
    }

    fn check_invariant(&self) {
        debug_assert_eq!(
            self.timer.is_running(),
            self.mode == Mode::Overlay && self.overlay.is_live(),
            "enforcement must run exactly while a live overlay is shown"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::fake::FakeBackend;
    use crate::window::InputMode;

    fn coordinator() -> ModeCoordinator<FakeBackend> {
        ModeCoordinator::new(FakeBackend::new(), CoordinatorConfig::default())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Primary window interactive and overlay capturing input at the same time
    fn both_active(c: &ModeCoordinator<FakeBackend>) -> bool {
        let main = c.backend().main_state();
        let overlay_accepting = c
            .overlay()
            .window()
            .is_some_and(|w| w.accepting_input());
        main.visible && main.focused && overlay_accepting
    }

    #[test]
    fn test_initial_state() {
        let c = coordinator();
        assert_eq!(
            c.state(),
            ModeState {
                mode: Mode::Normal,
                enforcement_active: false
            }
        );
        assert!(c.backend().main_state().visible);
    }

    #[test]
    fn test_enter_and_exit() {
        let t0 = Instant::now();
        let mut c = coordinator();

        let id = match c.toggle(t0) {
            Transition::EnteredOverlay(id) => id,
            other => panic!("unexpected transition: {:?}", other),
        };
        assert_eq!(c.state().mode, Mode::Overlay);
        assert!(c.state().enforcement_active);
        assert!(!c.backend().main_state().visible);
        assert_eq!(c.backend().main_state().created, 0);

        let overlay = c.backend().last_overlay().unwrap();
        assert_eq!(overlay.snapshot().input, Some(InputMode::Forward));

        assert_eq!(
            c.toggle(t0 + secs(1)),
            Transition::ExitedOverlay {
                window: Some(id),
                reason: ExitReason::Requested
            }
        );
        assert!(!c.state().enforcement_active);
        assert!(overlay.snapshot().destroyed);
        let main = c.backend().main_state();
        assert!(main.visible && main.focused);
    }

    #[test]
    fn test_main_focus_exits_overlay() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.enter_overlay(t0);

        let transition = c.on_main_focused();
        assert!(matches!(
            transition,
            Transition::ExitedOverlay {
                reason: ExitReason::MainWindowFocused,
                ..
            }
        ));
        assert_eq!(c.mode(), Mode::Normal);
        assert_eq!(c.on_main_focused(), Transition::Unchanged);
    }

    #[test]
    fn test_out_of_band_close_resynchronizes() {
        let t0 = Instant::now();
        let mut c = coordinator();
        let Transition::EnteredOverlay(id) = c.enter_overlay(t0) else {
            panic!("overlay not entered");
        };
        c.backend().last_overlay().unwrap().state.borrow_mut().destroyed = true;

        let transition = c.on_overlay_event(OverlayEvent {
            window: id,
            kind: OverlayEventKind::Closed,
        });
        assert!(matches!(
            transition,
            Transition::ExitedOverlay {
                window: None,
                reason: ExitReason::OverlayClosed
            }
        ));
        assert_eq!(c.state().mode, Mode::Normal);
        assert!(!c.state().enforcement_active);
        assert!(c.backend().main_state().visible);
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn test_stale_close_does_not_touch_new_overlay() {
        let t0 = Instant::now();
        let mut c = coordinator();
        let Transition::EnteredOverlay(first) = c.enter_overlay(t0) else {
            panic!("overlay not entered");
        };
        c.exit_overlay(ExitReason::Requested);
        c.enter_overlay(t0 + secs(1));

        // The platform reports the first window's close late.
        let transition = c.on_overlay_event(OverlayEvent {
            window: first,
            kind: OverlayEventKind::Closed,
        });
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(c.mode(), Mode::Overlay);
        assert!(c.overlay().is_live());
    }

    #[test]
    fn test_enforcement_detects_lost_window() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.enter_overlay(t0);
        c.backend().last_overlay().unwrap().state.borrow_mut().destroyed = true;

        assert_eq!(c.poll(t0 + secs(1)), Transition::Unchanged);
        assert!(matches!(
            c.poll(t0 + secs(2)),
            Transition::ExitedOverlay {
                reason: ExitReason::OverlayLost,
                ..
            }
        ));
        let stats = c.timer_stats();
        assert_eq!(stats.starts, stats.cancels);
    }

    #[test]
    fn test_enforcement_reshows_hidden_overlay() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.enter_overlay(t0);
        let overlay = c.backend().last_overlay().unwrap();
        overlay.state.borrow_mut().visible = false;

        c.poll(t0 + secs(2));
        assert!(overlay.snapshot().visible);
        assert_eq!(c.mode(), Mode::Overlay);
    }

    #[test]
    fn test_hide_event_is_undone() {
        let t0 = Instant::now();
        let mut c = coordinator();
        let Transition::EnteredOverlay(id) = c.enter_overlay(t0) else {
            panic!("overlay not entered");
        };
        let overlay = c.backend().last_overlay().unwrap();
        overlay.state.borrow_mut().minimized = true;

        c.on_overlay_event(OverlayEvent {
            window: id,
            kind: OverlayEventKind::Minimized,
        });
        assert!(!overlay.snapshot().minimized);
    }

    #[test]
    fn test_creation_failure_stays_normal() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.backend().fail_create.set(true);

        assert_eq!(c.enter_overlay(t0), Transition::Unchanged);
        assert_eq!(c.mode(), Mode::Normal);
        assert!(!c.state().enforcement_active);
        assert!(c.backend().main_state().visible);
        assert_eq!(c.timer_stats().starts, 0);
    }

    #[test]
    fn test_pass_through_ignored_in_normal_mode() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.enter_overlay(t0);
        c.set_input_transparent(true);
        let overlay = c.backend().last_overlay().unwrap();
        assert!(overlay.accepting_input());

        c.exit_overlay(ExitReason::Requested);
        c.set_input_transparent(true);
        assert!(!overlay.accepting_input());
    }

    #[test]
    fn test_main_window_recreated_when_missing() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.enter_overlay(t0);
        c.backend().main.borrow_mut().exists = false;

        c.exit_overlay(ExitReason::Requested);
        let main = c.backend().main_state();
        assert_eq!(main.created, 1);
        assert!(main.visible);
    }

    #[test]
    fn test_show_main_leaves_overlay() {
        let t0 = Instant::now();
        let mut c = coordinator();
        c.backend().main.borrow_mut().visible = false;
        assert_eq!(c.show_main(), Transition::Unchanged);
        assert!(c.backend().main_state().visible);

        c.enter_overlay(t0);
        assert!(matches!(
            c.show_main(),
            Transition::ExitedOverlay {
                reason: ExitReason::Requested,
                ..
            }
        ));
        assert_eq!(c.mode(), Mode::Normal);
        assert!(c.backend().main_state().focused);
    }

    #[test]
    fn test_main_close_quits_only_in_normal_mode() {
        let t0 = Instant::now();
        let mut c = coordinator();
        assert!(c.on_main_close_requested());

        c.enter_overlay(t0);
        assert!(!c.on_main_close_requested());
        assert_eq!(c.mode(), Mode::Overlay);
        assert!(!c.backend().main_state().visible);
    }

    #[test]
    fn test_timer_parity_over_many_toggles() {
        let t0 = Instant::now();
        let mut c = coordinator();
        let mut now = t0;
        let mut ticks_after_exit = 0;

        for round in 0..25u64 {
            c.toggle(now);
            now += Duration::from_millis(500 * (round % 7 + 1));
            c.poll(now);

            c.toggle(now);
            let ticks = c.timer_stats().ticks;
            for step in 1..5 {
                c.poll(now + secs(step * 2));
            }
            ticks_after_exit += c.timer_stats().ticks - ticks;
            now += secs(1);
        }

        let stats = c.timer_stats();
        assert_eq!(stats.starts, 25);
        assert_eq!(stats.starts, stats.cancels);
        assert_eq!(ticks_after_exit, 0);
        assert!(stats.ticks > 0);
    }

    #[test]
    fn test_mutual_exclusion_over_recorded_transitions() {
        let t0 = Instant::now();
        let mut c = coordinator();
        let mut now = t0;
        let mut checks = 0;

        // A scripted mix of toggles, pass-through requests, focus changes and closes.
        for step in 0..60u64 {
            match step % 6 {
                0 => {
                    c.toggle(now);
                }
                1 => c.set_input_transparent(true),
                2 => {
                    c.poll(now);
                }
                3 => {
                    if step % 12 == 3 {
                        c.on_main_focused();
                    } else {
                        c.set_input_transparent(false);
                    }
                }
                4 => {
                    if let Some(id) = c.overlay().current_id() {
                        if step % 18 == 4 {
                            c.backend().last_overlay().unwrap().state.borrow_mut().destroyed =
                                true;
                            c.on_overlay_event(OverlayEvent {
                                window: id,
                                kind: OverlayEventKind::Closed,
                            });
                        }
                    }
                }
                _ => {
                    c.toggle(now);
                }
            }
            now += Duration::from_millis(700);

            assert!(!both_active(&c), "both windows active at step {}", step);
            assert_eq!(
                c.state().enforcement_active,
                c.mode() == Mode::Overlay && c.overlay().is_live()
            );
            checks += 1;
        }
        assert_eq!(checks, 60);
    }
}
