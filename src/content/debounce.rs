//! Hover/press debounce engine
//!
//! Turns raw pointer events into pass-through requests. There is a single
//! pending slot: every new schedule replaces whatever had not fired yet, so
//! the last intent wins and one element can never hold two opposite
//! requests at once. Zero-delay schedules fire synchronously.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::dom::NodeId;
use crate::bridge::PassThroughRequest;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PointerKind {
    /// mouseenter / pointerenter
    Enter,
    /// mouseleave / pointerleave
    Leave,
    /// mousedown / touchstart
    Press,
    /// mouseup / touchend
    Release,
}

impl PointerKind {
    pub fn accept(self) -> bool {
        matches!(self, PointerKind::Enter | PointerKind::Press)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTimings {
    pub enter: Duration,
    pub leave: Duration,
    pub press: Duration,
    pub release: Duration,
    pub blur: Duration,
}

impl Default for DebounceTimings {
    fn default() -> Self {
        Self {
            enter: Duration::from_millis(25),
            leave: Duration::from_millis(120),
            press: Duration::ZERO,
            release: Duration::from_millis(150),
            blur: Duration::from_millis(50),
        }
    }
}

impl DebounceTimings {
    pub fn delay(&self, kind: PointerKind) -> Duration {
        match kind {
            PointerKind::Enter => self.enter,
            PointerKind::Leave => self.leave,
            PointerKind::Press => self.press,
            PointerKind::Release => self.release,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    accept: bool,
    due: Instant,
    /// None for the window-blur safety net
    source: Option<NodeId>,
}

/// The last request that actually reached the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fired {
    accept: bool,
    source: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct DebounceEngine {
    timings: DebounceTimings,
    pending: Option<Pending>,
    fired: Option<Fired>,
    superseded: u64,
}

impl DebounceEngine {
    pub fn new(timings: DebounceTimings) -> Self {
        Self {
            timings,
            pending: None,
            fired: None,
            superseded: 0,
        }
    }

    pub fn timings(&self) -> &DebounceTimings {
        &self.timings
    }

    /// Number of scheduled requests dropped before they fired
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn pending_accept(&self) -> Option<bool> {
        self.pending.map(|p| p.accept)
    }

    pub fn pending_source(&self) -> Option<NodeId> {
        self.pending.and_then(|p| p.source)
    }

    /// Whether the host was last told to accept input
    pub fn accepting(&self) -> bool {
        self.fired.is_some_and(|f| f.accept)
    }

    /// Schedule the request for a pointer event on `node`.
    /// Returns the request when it is due immediately.
    pub fn on_pointer(
        &mut self,
        now: Instant,
        node: NodeId,
        kind: PointerKind,
    ) -> Option<PassThroughRequest> {
        let delay = self.timings.delay(kind);
        self.schedule(now, kind.accept(), delay, Some(node))
    }

    /// Overlay window lost focus: always fall back to forwarding input
    pub fn on_blur(&mut self, now: Instant) -> Option<PassThroughRequest> {
        let delay = self.timings.blur;
        self.schedule(now, false, delay, None)
    }

    /// Drop a pending request that originated from `node`
    pub fn cancel_for(&mut self, node: NodeId) -> bool {
        if self.pending.is_some_and(|p| p.source == Some(node)) {
            log::debug!("Cancelling pending pass-through request from detached node {:?}", node);
            self.pending = None;
            return true;
        }
        false
    }

    /// `node` left the document. Its pending request is dropped, and if
    /// the overlay is capturing input on its behalf, input goes back to
    /// forwarding after the leave delay. `hovered` is the caller's view
    /// of whether the pointer was over the node.
    pub fn on_detached(
        &mut self,
        now: Instant,
        node: NodeId,
        hovered: bool,
    ) -> Option<PassThroughRequest> {
        let dropped = self.pending.filter(|p| p.source == Some(node));
        if dropped.is_some() {
            self.cancel_for(node);
        }
        if self.pending.is_some() || !self.accepting() {
            return None;
        }

        let owned = self.fired.is_some_and(|f| f.source == Some(node));
        let leaving = dropped.is_some_and(|p| !p.accept);
        if !(owned || hovered || leaving) {
            return None;
        }
        log::debug!("Interactive node {:?} detached while accepting input", node);
        let delay = self.timings.leave;
        self.schedule(now, false, delay, None)
    }

    pub fn cancel_all(&mut self) {
        self.pending = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Fire the pending request if it is due
    pub fn poll(&mut self, now: Instant) -> Option<PassThroughRequest> {
        match self.pending {
            Some(p) if p.due <= now => {
                self.pending = None;
                self.fired = Some(Fired {
                    accept: p.accept,
                    source: p.source,
                });
                Some(PassThroughRequest {
                    accept: p.accept,
                    requested_at: now,
                })
            }
            _ => None,
        }
    }

    fn schedule(
        &mut self,
        now: Instant,
        accept: bool,
        delay: Duration,
        source: Option<NodeId>,
    ) -> Option<PassThroughRequest> {
        if self.pending.take().is_some() {
            self.superseded += 1;
        }

        if delay.is_zero() {
            self.fired = Some(Fired { accept, source });
            return Some(PassThroughRequest {
                accept,
                requested_at: now,
            });
        }

        self.pending = Some(Pending {
            accept,
            due: now + delay,
            source,
        });
        None
    }
}
