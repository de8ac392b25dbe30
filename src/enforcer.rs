//! Ambient visibility enforcement
//!
//! Window managers quietly revoke topmost status or hide overlays (space
//! switches, full-screen apps, "show desktop"). While in overlay mode a
//! fixed-period timer re-asserts the state that cannot be trusted to stick.

use std::time::{Duration, Instant};

use crate::window::{OverlayController, OverlayWindow, WindowError};

pub const DEFAULT_ENFORCEMENT_PERIOD: Duration = Duration::from_secs(2);

/// Counters for start/cancel parity checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub starts: u64,
    pub cancels: u64,
    pub ticks: u64,
}

/// Repeating timer driven by the caller's clock
#[derive(Debug)]
pub struct EnforcementTimer {
    period: Duration,
    next_tick: Option<Instant>,
    stats: TimerStats,
}

impl EnforcementTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_tick: None,
            stats: TimerStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Start the timer. A running timer is left alone so a start is never doubled.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_running() {
            log::warn!("Enforcement timer already running; not starting another");
            return false;
        }
        self.next_tick = Some(now + self.period);
        self.stats.starts += 1;
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.next_tick.take().is_none() {
            return false;
        }
        self.stats.cancels += 1;
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Consume a due tick. Missed periods collapse into one tick.
    pub fn take_due(&mut self, now: Instant) -> bool {
        let Some(at) = self.next_tick else {
            return false;
        };
        if now < at {
            return false;
        }

        let mut next = at + self.period;
        while next <= now {
            next += self.period;
        }
        self.next_tick = Some(next);
        self.stats.ticks += 1;
        true
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }
}

/// What one enforcement pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforceReport {
    pub reshown: bool,
    pub relevelled: bool,
    pub failures: usize,
    pub destroyed: bool,
}

/// Re-assert visibility, topmost level and workspace visibility.
///
/// Each step is isolated: a failure is logged and the remaining steps still run.
pub fn enforce_ambient_visibility<W: OverlayWindow>(
    controller: &OverlayController<W>,
) -> EnforceReport {
    let mut report = EnforceReport::default();

    if !controller.is_live() {
        report.destroyed = true;
        return report;
    }

    match controller.ensure_visible() {
        Ok(reshown) => report.reshown = reshown,
        Err(e) => record_failure(&mut report, "show", e),
    }

    match controller.ensure_topmost() {
        Ok(relevelled) => report.relevelled = relevelled,
        Err(e) => record_failure(&mut report, "always-on-top", e),
    }

    if let Err(e) = controller.reassert_workspaces() {
        record_failure(&mut report, "workspace visibility", e);
    }

    if report.reshown || report.relevelled {
        log::debug!("Ambient visibility corrected: {:?}", report);
    }

    report
}

fn record_failure(report: &mut EnforceReport, step: &str, error: WindowError) {
    match error {
        WindowError::Destroyed => report.destroyed = true,
        other => {
            report.failures += 1;
            log::warn!("Error enforcing ambient visibility ({}): {}", step, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::fake::FakeBackend;
    use crate::window::{Bounds, WindowLevel};

    #[test]
    fn test_timer_ticks_periodically() {
        let t0 = Instant::now();
        let mut timer = EnforcementTimer::new(Duration::from_secs(2));

        assert!(!timer.take_due(t0));
        assert!(timer.start(t0));
        assert!(!timer.take_due(t0 + Duration::from_millis(1999)));
        assert!(timer.take_due(t0 + Duration::from_secs(2)));
        assert!(!timer.take_due(t0 + Duration::from_secs(3)));
        assert!(timer.take_due(t0 + Duration::from_secs(4)));
        assert_eq!(timer.stats().ticks, 2);
    }

    #[test]
    fn test_missed_periods_collapse() {
        let t0 = Instant::now();
        let mut timer = EnforcementTimer::new(Duration::from_secs(2));
        timer.start(t0);

        assert!(timer.take_due(t0 + Duration::from_secs(11)));
        assert!(!timer.take_due(t0 + Duration::from_secs(11)));
        assert_eq!(timer.next_deadline(), Some(t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_no_tick_after_cancel() {
        let t0 = Instant::now();
        let mut timer = EnforcementTimer::new(Duration::from_secs(2));
        timer.start(t0);
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.take_due(t0 + Duration::from_secs(10)));

        let stats = timer.stats();
        assert_eq!(stats.starts, stats.cancels);
        assert_eq!(stats.ticks, 0);
    }

    #[test]
    fn test_double_start_is_refused() {
        let t0 = Instant::now();
        let mut timer = EnforcementTimer::new(Duration::from_secs(2));
        assert!(timer.start(t0));
        assert!(!timer.start(t0));
        assert_eq!(timer.stats().starts, 1);
    }

    #[test]
    fn test_enforce_restores_revoked_state() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        controller.create(&backend, Bounds::default(), None).unwrap();
        let overlay = backend.last_overlay().unwrap();

        {
            let mut state = overlay.state.borrow_mut();
            state.visible = false;
            state.level = Some(WindowLevel::Normal);
            state.all_workspaces = false;
        }

        let report = enforce_ambient_visibility(&controller);
        assert!(report.reshown);
        assert!(report.relevelled);
        assert_eq!(report.failures, 0);

        let state = overlay.snapshot();
        assert!(state.visible);
        assert_eq!(state.level, Some(WindowLevel::ScreenSaver));
        assert!(state.all_workspaces);
    }

    #[test]
    fn test_enforce_on_correct_window_changes_nothing() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        controller.create(&backend, Bounds::default(), None).unwrap();
        let overlay = backend.last_overlay().unwrap();
        let before = overlay.snapshot();
        let shows = overlay.calls.borrow().show;
        let levels = overlay.calls.borrow().set_level;

        let report = enforce_ambient_visibility(&controller);
        assert_eq!(report, EnforceReport::default());
        assert_eq!(overlay.snapshot(), before);
        assert_eq!(overlay.calls.borrow().show, shows);
        assert_eq!(overlay.calls.borrow().set_level, levels);
    }

    #[test]
    fn test_enforce_on_normal_level_window_changes_nothing() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::Normal);
        controller.create(&backend, Bounds::default(), None).unwrap();
        let overlay = backend.last_overlay().unwrap();
        let levels = overlay.calls.borrow().set_level;

        for _ in 0..3 {
            assert_eq!(enforce_ambient_visibility(&controller), EnforceReport::default());
        }
        assert_eq!(overlay.calls.borrow().set_level, levels);
    }

    #[test]
    fn test_failing_step_does_not_stop_the_rest() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        controller.create(&backend, Bounds::default(), None).unwrap();
        let overlay = backend.last_overlay().unwrap();
        overlay.fail_queries.set(true);
        overlay.state.borrow_mut().all_workspaces = false;

        let report = enforce_ambient_visibility(&controller);
        assert_eq!(report.failures, 2);
        assert!(!report.destroyed);
        assert!(overlay.snapshot().all_workspaces);
    }

    #[test]
    fn test_destroyed_window_is_reported() {
        let backend = FakeBackend::new();
        let mut controller = OverlayController::new(WindowLevel::ScreenSaver);
        controller.create(&backend, Bounds::default(), None).unwrap();
        backend.last_overlay().unwrap().state.borrow_mut().destroyed = true;

        let report = enforce_ambient_visibility(&controller);
        assert!(report.destroyed);
    }
}
