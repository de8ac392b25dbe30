//! Overlay content layer
//!
//! Owns the overlay's document, the interactive registry, the debounce
//! engine and the popup flow. Everything is driven by explicit calls with
//! the current time so the session task (or a test) decides when timers
//! fire: call [`OverlayContent::poll`] at [`OverlayContent::next_deadline`].

pub mod debounce;
pub mod dom;
pub mod registry;
pub mod render;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::bridge::{ContentMessage, ContentPort};
use crate::feed::{Deadline, FeedSnapshot, FeedUpdate};
use crate::settings::{default_widget_palette, ColorPair, OverlaySettings};

use debounce::{DebounceEngine, DebounceTimings, PointerKind};
use dom::{Document, NodeId, Role};
use registry::InteractiveRegistry;
use render::{TimelineEntry, WidgetLayout};

pub const FEED_FAILED_MESSAGE: &str = "Failed to load data. Is the backend running?";
pub const DONE_MESSAGE: &str = "Marked as done";
pub const DONE_POPUP_DURATION: Duration = Duration::from_millis(500);

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum FeedStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Work the content layer asks its session to perform
#[derive(Debug, Clone, PartialEq)]
pub enum ContentEffect {
    CompleteDeadline(Deadline),
}

/// Element bounds in overlay coordinates, as reported by the webview
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, Copy)]
struct FixedNodes {
    loading: NodeId,
    progress_bar: NodeId,
    timeline: NodeId,
    widget_popup: NodeId,
    check_box: NodeId,
    confirm_popup: NodeId,
    yes: NodeId,
    no: NodeId,
    done_popup: NodeId,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PopupState {
    active_widget: Option<i64>,
    confirm_open: bool,
    done_until: Option<Instant>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub node: NodeId,
    #[serde(flatten)]
    pub layout: WidgetLayout,
    pub hidden: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PopupView {
    pub deadline_id: i64,
    pub text: String,
    pub color: String,
    pub border: String,
}

/// Interactive node ids the webview reports events against
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlIds {
    pub widget_popup: NodeId,
    pub check_box: NodeId,
    pub confirm_popup: NodeId,
    pub yes: NodeId,
    pub no: NodeId,
}

/// Everything the webview needs to paint one frame
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayView {
    pub status: FeedStatus,
    pub loading_text: Option<String>,
    pub settings: OverlaySettings,
    pub widgets: Vec<WidgetView>,
    pub timeline: Vec<TimelineEntry>,
    pub current_time_percent: f64,
    pub widget_popup: Option<PopupView>,
    pub confirm_open: bool,
    pub done_text: Option<String>,
    pub controls: ControlIds,
}

pub struct OverlayContent {
    doc: Document,
    registry: InteractiveRegistry,
    debounce: DebounceEngine,
    port: ContentPort,
    settings: OverlaySettings,
    palette: Vec<ColorPair>,
    status: FeedStatus,
    snapshot: FeedSnapshot,
    nodes: FixedNodes,
    dock: Option<NodeId>,
    widget_nodes: HashMap<i64, NodeId>,
    widgets: Vec<WidgetLayout>,
    timeline: Vec<TimelineEntry>,
    dismissed: HashSet<i64>,
    popup: PopupState,
    rects: HashMap<NodeId, Rect>,
    hovered: Option<NodeId>,
    wall: DateTime<Local>,
}

fn fixed(doc: &mut Document, parent: NodeId, role: Role, interactive: bool) -> NodeId {
    doc.append(parent, role, interactive)
        .unwrap_or_else(|| doc.root())
}

impl OverlayContent {
    pub fn new(port: ContentPort, timings: DebounceTimings, wall: DateTime<Local>) -> Self {
        let mut doc = Document::new();
        let root = doc.root();
        let loading = fixed(&mut doc, root, Role::Loading, false);
        let progress_bar = fixed(&mut doc, root, Role::ProgressBar, false);
        let timeline = fixed(&mut doc, progress_bar, Role::Timeline, false);
        let widget_popup = fixed(&mut doc, root, Role::WidgetPopup, true);
        let check_box = fixed(&mut doc, widget_popup, Role::CheckBox, true);
        let confirm_popup = fixed(&mut doc, root, Role::ConfirmPopup, true);
        let yes = fixed(&mut doc, confirm_popup, Role::YesButton, true);
        let no = fixed(&mut doc, confirm_popup, Role::NoButton, true);
        let done_popup = fixed(&mut doc, root, Role::DonePopup, false);
        for popup in [widget_popup, confirm_popup, done_popup] {
            doc.set_hidden(popup, true);
        }

        let mut registry = InteractiveRegistry::new();
        registry.scan(&doc);
        doc.take_records();

        let mut content = Self {
            doc,
            registry,
            debounce: DebounceEngine::new(timings),
            port,
            settings: OverlaySettings::default(),
            palette: default_widget_palette(),
            status: FeedStatus::Loading,
            snapshot: FeedSnapshot {
                deadlines: Vec::new(),
                events: Vec::new(),
            },
            nodes: FixedNodes {
                loading,
                progress_bar,
                timeline,
                widget_popup,
                check_box,
                confirm_popup,
                yes,
                no,
                done_popup,
            },
            dock: None,
            widget_nodes: HashMap::new(),
            widgets: Vec::new(),
            timeline: Vec::new(),
            dismissed: HashSet::new(),
            popup: PopupState::default(),
            rects: HashMap::new(),
            hovered: None,
            wall,
        };
        content.render(Instant::now());
        content
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn registry(&self) -> &InteractiveRegistry {
        &self.registry
    }

    pub fn debounce(&self) -> &DebounceEngine {
        &self.debounce
    }

    pub fn widget_node(&self, deadline_id: i64) -> Option<NodeId> {
        self.widget_nodes.get(&deadline_id).copied()
    }

    pub fn controls(&self) -> ControlIds {
        ControlIds {
            widget_popup: self.nodes.widget_popup,
            check_box: self.nodes.check_box,
            confirm_popup: self.nodes.confirm_popup,
            yes: self.nodes.yes,
            no: self.nodes.no,
        }
    }

    /// Apply a host push. Duplicates and reordering are harmless.
    pub fn apply_message(&mut self, now: Instant, message: &ContentMessage) {
        let changed = match message {
            ContentMessage::Settings(patch) => self.settings.apply(patch),
            ContentMessage::Colors(colors) => {
                let mut changed = self.settings.apply(&colors.progress_bar());
                if let Some(palette) = &colors.widget_colors {
                    if !palette.is_empty() && *palette != self.palette {
                        self.palette = palette.clone();
                        changed = true;
                    }
                }
                changed
            }
        };
        if changed {
            log::debug!("Overlay settings now {:?}", self.settings);
            self.render(now);
        }
    }

    pub fn apply_feed(&mut self, now: Instant, update: FeedUpdate, wall: DateTime<Local>) {
        self.wall = wall;
        match update {
            FeedUpdate::Loaded(snapshot) => {
                self.dismissed
                    .retain(|id| snapshot.deadlines.iter().any(|d| d.id == *id && !d.completed));
                self.snapshot = snapshot;
                self.status = FeedStatus::Ready;
            }
            FeedUpdate::Failed(reason) => {
                log::warn!("Overlay data feed unavailable: {}", reason);
                self.status = FeedStatus::Failed(reason);
            }
        }
        self.render(now);
    }

    /// Advance the wall clock used for layout (current-time marker, "upcoming")
    pub fn tick_wall_clock(&mut self, now: Instant, wall: DateTime<Local>) {
        self.wall = wall;
        self.render(now);
    }

    /// A pointer event on `node`. Nodes outside the registry are ignored.
    pub fn pointer(&mut self, now: Instant, node: NodeId, kind: PointerKind) {
        if !self.registry.contains(node) {
            log::trace!("Ignoring {:?} on non-interactive node {:?}", kind, node);
            return;
        }
        match kind {
            PointerKind::Enter => self.hovered = Some(node),
            PointerKind::Leave if self.hovered == Some(node) => self.hovered = None,
            _ => {}
        }
        if let Some(request) = self.debounce.on_pointer(now, node, kind) {
            self.port.request_pass_through(request);
        }
    }

    /// The overlay window lost OS focus
    pub fn blur(&mut self, now: Instant) {
        self.hovered = None;
        if let Some(request) = self.debounce.on_blur(now) {
            self.port.request_pass_through(request);
        }
    }

    /// Element bounds for cursor hit-testing in forward mode
    pub fn set_element_rects(&mut self, rects: impl IntoIterator<Item = (NodeId, Rect)>) {
        self.rects = rects
            .into_iter()
            .filter(|(node, _)| self.registry.contains(*node))
            .collect();
    }

    /// Cursor sample while input is forwarded; synthesizes enter/leave
    pub fn pointer_moved(&mut self, now: Instant, x: f64, y: f64) {
        let hit = self.hit_test(x, y);
        if hit == self.hovered {
            return;
        }
        if let Some(previous) = self.hovered.take() {
            self.pointer(now, previous, PointerKind::Leave);
        }
        if let Some(node) = hit {
            self.pointer(now, node, PointerKind::Enter);
        }
        self.hovered = hit;
    }

    /// Cursor sample outside the overlay window
    pub fn pointer_left_window(&mut self, now: Instant) {
        if let Some(previous) = self.hovered.take() {
            self.pointer(now, previous, PointerKind::Leave);
        }
    }

    fn hit_test(&self, x: f64, y: f64) -> Option<NodeId> {
        self.rects
            .iter()
            .filter(|(node, rect)| rect.contains(x, y) && self.is_shown(**node))
            .min_by(|(_, a), (_, b)| a.area().total_cmp(&b.area()))
            .map(|(node, _)| *node)
    }

    fn is_shown(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            match self.doc.get(id) {
                Some(element) if !element.hidden => current = element.parent(),
                _ => return false,
            }
        }
        true
    }

    /// A click that reached the document
    pub fn click(&mut self, target: NodeId) -> Option<ContentEffect> {
        if !self.doc.contains_node(target) {
            self.close_popups();
            return None;
        }

        let role = self.doc.get(target).map(|e| e.role.clone());
        let widget = self
            .doc
            .closest(target, |r| matches!(r, Role::Widget { .. }))
            .and_then(|id| match self.doc.get(id).map(|e| &e.role) {
                Some(Role::Widget { deadline_id }) => Some(*deadline_id),
                _ => None,
            });

        if let Some(deadline_id) = widget {
            if self.popup.active_widget == Some(deadline_id) {
                self.close_popups();
            } else {
                self.open_widget_popup(deadline_id);
            }
            return None;
        }

        match role {
            Some(Role::CheckBox) if self.popup.active_widget.is_some() => {
                self.popup.confirm_open = true;
                self.sync_popups();
                None
            }
            Some(Role::YesButton) => {
                let active = self.popup.active_widget;
                self.popup.confirm_open = false;
                self.popup.active_widget = None;
                self.sync_popups();
                let deadline =
                    active.and_then(|id| self.snapshot.deadlines.iter().find(|d| d.id == id));
                deadline.cloned().map(ContentEffect::CompleteDeadline)
            }
            Some(Role::NoButton) => {
                self.popup.confirm_open = false;
                self.sync_popups();
                None
            }
            _ => {
                let inside_popup = self.doc.is_within(target, self.nodes.widget_popup)
                    || self.doc.is_within(target, self.nodes.confirm_popup);
                if !inside_popup {
                    self.close_popups();
                }
                None
            }
        }
    }

    /// The host marked `deadline_id` complete and refreshed the feed
    pub fn deadline_completed(&mut self, now: Instant, deadline_id: i64) {
        self.dismissed.insert(deadline_id);
        self.popup.done_until = Some(now + DONE_POPUP_DURATION);
        self.sync_popups();
        self.render(now);
    }

    /// Fire due timers
    pub fn poll(&mut self, now: Instant) {
        if let Some(request) = self.debounce.poll(now) {
            self.port.request_pass_through(request);
        }
        if self.popup.done_until.is_some_and(|until| until <= now) {
            self.popup.done_until = None;
            self.sync_popups();
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce.next_deadline(), self.popup.done_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn view(&self) -> OverlayView {
        let widget_popup = self.popup.active_widget.and_then(|id| {
            self.widgets
                .iter()
                .find(|w| w.deadline_id == id)
                .map(|w| PopupView {
                    deadline_id: id,
                    text: w.popup_title.clone(),
                    color: w.color.clone(),
                    border: w.border.clone(),
                })
        });
        OverlayView {
            status: self.status.clone(),
            loading_text: match &self.status {
                FeedStatus::Loading => Some(String::from("Loading...")),
                FeedStatus::Failed(_) => Some(FEED_FAILED_MESSAGE.to_string()),
                FeedStatus::Ready => None,
            },
            settings: self.settings.clone(),
            widgets: self
                .widgets
                .iter()
                .filter_map(|layout| {
                    let node = self.widget_node(layout.deadline_id)?;
                    Some(WidgetView {
                        node,
                        layout: layout.clone(),
                        hidden: self.dismissed.contains(&layout.deadline_id),
                    })
                })
                .collect(),
            timeline: self.timeline.clone(),
            current_time_percent: render::current_time_percent(self.wall),
            widget_popup,
            confirm_open: self.popup.confirm_open,
            done_text: self.popup.done_until.map(|_| DONE_MESSAGE.to_string()),
            controls: self.controls(),
        }
    }

    fn open_widget_popup(&mut self, deadline_id: i64) {
        self.popup.active_widget = Some(deadline_id);
        self.popup.confirm_open = false;
        self.sync_popups();
    }

    fn close_popups(&mut self) {
        self.popup.active_widget = None;
        self.popup.confirm_open = false;
        self.popup.done_until = None;
        self.sync_popups();
    }

    fn sync_popups(&mut self) {
        let popup_open = self.popup.active_widget.is_some();
        self.doc.set_hidden(self.nodes.widget_popup, !popup_open);
        self.doc
            .set_hidden(self.nodes.confirm_popup, !(popup_open && self.popup.confirm_open));
        self.doc
            .set_hidden(self.nodes.done_popup, self.popup.done_until.is_none());
    }

    fn render(&mut self, now: Instant) {
        self.doc
            .set_hidden(self.nodes.loading, self.status == FeedStatus::Ready);
        self.doc
            .set_hidden(self.nodes.progress_bar, !self.settings.progress_bar_enabled);

        if self.settings.widgets_enabled {
            self.render_dock();
        } else if let Some(dock) = self.dock.take() {
            self.doc.remove(dock);
            self.widget_nodes.clear();
            self.widgets.clear();
        }

        if let Some(active) = self.popup.active_widget {
            if !self.widget_nodes.contains_key(&active) {
                self.popup.active_widget = None;
                self.popup.confirm_open = false;
            }
        }
        self.sync_popups();

        self.timeline = if self.settings.progress_bar_enabled {
            render::layout_timeline(&self.snapshot.events, self.wall)
        } else {
            Vec::new()
        };

        self.flush_mutations(now);
    }

    fn render_dock(&mut self) {
        let dock = match self.dock {
            Some(dock) => dock,
            None => {
                let root = self.doc.root();
                let dock = fixed(&mut self.doc, root, Role::Dock, false);
                self.dock = Some(dock);
                dock
            }
        };

        let layouts = render::layout_widgets(&self.snapshot.deadlines, &self.palette, self.wall);
        let wanted: HashSet<i64> = layouts.iter().map(|w| w.deadline_id).collect();

        let stale: Vec<i64> = self
            .widget_nodes
            .keys()
            .copied()
            .filter(|id| !wanted.contains(id))
            .collect();
        for id in stale {
            if let Some(node) = self.widget_nodes.remove(&id) {
                self.doc.remove(node);
            }
        }

        let mut order = Vec::with_capacity(layouts.len());
        for layout in &layouts {
            let id = layout.deadline_id;
            let node = match self.widget_nodes.get(&id) {
                Some(node) => *node,
                None => {
                    let node = fixed(&mut self.doc, dock, Role::Widget { deadline_id: id }, true);
                    self.widget_nodes.insert(id, node);
                    node
                }
            };
            self.doc.set_hidden(node, self.dismissed.contains(&id));
            order.push(node);
        }
        self.doc.reorder(dock, &order);
        self.widgets = layouts;
    }

    /// Hand structural changes to the registry; detached nodes lose any
    /// pending request and their hover state, and stop holding input
    fn flush_mutations(&mut self, now: Instant) {
        let records = self.doc.take_records();
        if records.is_empty() {
            return;
        }
        let changes = self.registry.observe(&self.doc, &records);
        for node in changes.detached {
            let hovered = self.hovered == Some(node);
            if hovered {
                self.hovered = None;
            }
            self.rects.remove(&node);
            if let Some(request) = self.debounce.on_detached(now, node, hovered) {
                self.port.request_pass_through(request);
            }
        }
    }
}
