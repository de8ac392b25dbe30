//! Host event loop
//!
//! A single task owns the mode coordinator. Window events, tray/shortcut
//! actions and commands reach it as [`HostEvent`]s. While the overlay is up
//! a content session task runs the overlay's content layer and talks to the
//! host only through the bridge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Deserialize;
use tauri::async_runtime::JoinHandle;
use tauri::{AppHandle, Emitter, EventTarget};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::bridge::{self, ContentEnd, HostEnd, HostMessage};
use crate::content::debounce::{DebounceTimings, PointerKind};
use crate::content::dom::NodeId;
use crate::content::{ContentEffect, OverlayContent, OverlayView, Rect};
use crate::feed::{
    FeedClient, FeedError, FeedSnapshot, FeedSource, FeedUpdate, PollPolicy, PollerHandle,
};
use crate::mode::{CoordinatorConfig, Mode, ModeCoordinator, ModeState, Transition};
use crate::overlay::{TauriWindows, MAIN_WINDOW_LABEL};
use crate::settings::{self, ColorsPatch, SettingsPatch};
use crate::window::{OverlayEvent, WindowId};

const CURSOR_SAMPLE_PERIOD: Duration = Duration::from_millis(50);
const WALL_CLOCK_PERIOD: Duration = Duration::from_secs(60);

pub mod events {
    pub const MODE_CHANGED: &str = "overlay-mode-changed";
    pub const OVERLAY_VIEW: &str = "overlay-view";
}

/// Element bounds reported by the overlay webview
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct ElementRect {
    pub node: NodeId,
    pub rect: Rect,
}

/// Input from the overlay webview for its content session
#[derive(Debug)]
pub enum ContentInput {
    Ready,
    Pointer { node: NodeId, kind: PointerKind },
    Click(NodeId),
    Rects(Vec<ElementRect>),
    /// Cursor position in overlay CSS pixels, None when outside the window
    Cursor(Option<(f64, f64)>),
    Blur,
}

#[derive(Debug)]
pub enum HostEvent {
    Toggle,
    ShowMain,
    MainFocused,
    MainCloseRequested,
    Overlay(OverlayEvent),
    Content { window: WindowId, input: ContentInput },
    Settings(SettingsPatch),
    Colors(ColorsPatch),
    QueryState(oneshot::Sender<ModeState>),
}

/// Managed handle for sending events to the host loop
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostHandle {
    pub fn send(&self, event: HostEvent) -> Result<(), String> {
        self.tx
            .send(event)
            .map_err(|e| format!("Host loop is not running: {:?}", e.0))
    }

    /// Route webview input to the content session of the overlay labelled `label`
    pub fn send_content(&self, label: &str, input: ContentInput) -> Result<(), String> {
        let window = WindowId::from_label(label)
            .ok_or_else(|| format!("'{}' is not an overlay window", label))?;
        self.send(HostEvent::Content { window, input })
    }

    pub async fn state(&self) -> Result<ModeState, String> {
        let (reply, rx) = oneshot::channel();
        self.send(HostEvent::QueryState(reply))?;
        rx.await
            .map_err(|e| format!("Host loop dropped state query: {}", e))
    }
}

/// Spawn the host loop
pub fn start(app: &AppHandle, config: CoordinatorConfig) -> HostHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tauri::async_runtime::spawn(run_host(app.clone(), rx, config));
    HostHandle { tx }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// One overlay's content layer, running in its own task
struct ContentSession {
    window: WindowId,
    bridge: HostEnd,
    input: mpsc::UnboundedSender<ContentInput>,
    task: JoinHandle<()>,
}

impl ContentSession {
    fn start(app: &AppHandle, window: WindowId) -> Result<Self, FeedError> {
        let settings = settings::get_settings(app);
        let policy = settings.poll_policy();
        let client = FeedClient::new(&settings.api_base_url, policy.request_timeout)?;

        let (bridge, content_end) = bridge::channel();
        // Seed the content layer with persisted settings before anything renders
        bridge
            .port
            .push_settings(settings.overlay_settings().as_patch());
        if let Some(colors) = settings.colors_patch() {
            bridge.port.push_colors(colors);
        }

        let (input, input_rx) = mpsc::unbounded_channel();
        let task = tauri::async_runtime::spawn(run_content_session(
            app.clone(),
            window,
            content_end,
            input_rx,
            client,
            policy,
        ));

        log::info!(
            "Overlay content session started for {:?} (feed {})",
            window,
            settings.api_base_url
        );
        Ok(Self {
            window,
            bridge,
            input,
            task,
        })
    }

    fn forward(&self, input: ContentInput) {
        if self.input.send(input).is_err() {
            log::warn!("Overlay content session for {:?} is gone", self.window);
        }
    }
}

impl Drop for ContentSession {
    fn drop(&mut self) {
        self.task.abort();
        log::debug!("Overlay content session for {:?} stopped", self.window);
    }
}

async fn next_host_message(session: &mut Option<ContentSession>) -> Option<HostMessage> {
    match session {
        Some(session) => session.bridge.inbox.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_host(
    app: AppHandle,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    config: CoordinatorConfig,
) {
    let mut coordinator = ModeCoordinator::new(TauriWindows::new(app.clone()), config);
    let mut session: Option<ContentSession> = None;
    let mut forwarding = true;
    let mut cursor = tokio::time::interval(CURSOR_SAMPLE_PERIOD);
    cursor.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!("Host event loop running");

    loop {
        let deadline = coordinator.next_deadline();
        let sampling = forwarding && coordinator.mode() == Mode::Overlay && session.is_some();

        let transition = tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&app, &mut coordinator, &session, event),
                None => break,
            },
            message = next_host_message(&mut session) => match message {
                Some(HostMessage::PassThrough(request)) => {
                    forwarding = !request.accept;
                    coordinator.set_input_transparent(request.accept);
                    Transition::Unchanged
                }
                None => {
                    log::warn!("Overlay content session ended unexpectedly");
                    session = None;
                    Transition::Unchanged
                }
            },
            _ = sleep_until(deadline) => coordinator.poll(Instant::now()),
            _ = cursor.tick(), if sampling => {
                if let (Some(session), Some(overlay)) = (&session, coordinator.overlay().window()) {
                    session.forward(ContentInput::Cursor(overlay.cursor_in_window()));
                }
                Transition::Unchanged
            },
        };

        match transition {
            Transition::Unchanged => continue,
            Transition::EnteredOverlay(window) => {
                forwarding = true;
                session = match ContentSession::start(&app, window) {
                    Ok(session) => Some(session),
                    Err(e) => {
                        log::error!("Failed to start overlay content session: {}", e);
                        None
                    }
                };
            }
            Transition::ExitedOverlay { .. } => {
                session = None;
            }
        }

        if let Err(e) = app.emit_to(
            EventTarget::webview_window(MAIN_WINDOW_LABEL),
            events::MODE_CHANGED,
            coordinator.state(),
        ) {
            log::debug!("Failed to emit mode change: {}", e);
        }
    }

    log::info!("Host event loop stopped");
}

fn handle_event(
    app: &AppHandle,
    coordinator: &mut ModeCoordinator<TauriWindows>,
    session: &Option<ContentSession>,
    event: HostEvent,
) -> Transition {
    match event {
        HostEvent::Toggle => coordinator.toggle(Instant::now()),
        HostEvent::ShowMain => coordinator.show_main(),
        HostEvent::MainFocused => coordinator.on_main_focused(),
        HostEvent::MainCloseRequested => {
            if coordinator.on_main_close_requested() {
                log::info!("Main window closed, quitting");
                app.exit(0);
            }
            Transition::Unchanged
        }
        HostEvent::Overlay(event) => coordinator.on_overlay_event(event),
        HostEvent::Content { window, input } => {
            match session.as_ref().filter(|s| s.window == window) {
                Some(session) => session.forward(input),
                None => log::debug!("Dropping input for inactive overlay {:?}", window),
            }
            Transition::Unchanged
        }
        HostEvent::Settings(patch) => {
            if let Some(session) = session {
                session.bridge.port.push_settings(patch);
            }
            Transition::Unchanged
        }
        HostEvent::Colors(colors) => {
            if let Some(session) = session {
                session.bridge.port.push_colors(colors);
            }
            Transition::Unchanged
        }
        HostEvent::QueryState(reply) => {
            let _ = reply.send(coordinator.state());
            Transition::Unchanged
        }
    }
}

/// Result of a completed "mark as done"
struct Completion {
    deadline_id: i64,
    refreshed: Result<FeedSnapshot, FeedError>,
}

async fn run_content_session(
    app: AppHandle,
    window: WindowId,
    end: ContentEnd,
    mut input: mpsc::UnboundedReceiver<ContentInput>,
    client: FeedClient,
    policy: PollPolicy,
) {
    let ContentEnd {
        port,
        inbox: mut pushes,
    } = end;
    let client = Arc::new(client);
    let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
    let _poller = PollerHandle::spawn(Arc::clone(&client), policy, feed_tx);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut content = OverlayContent::new(port, DebounceTimings::default(), Local::now());
    let mut clock = tokio::time::interval(WALL_CLOCK_PERIOD);
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let target = EventTarget::webview_window(window.label());
    let mut last_view: Option<OverlayView> = None;

    loop {
        let deadline = content.next_deadline();
        tokio::select! {
            update = feed_rx.recv() => match update {
                Some(update) => content.apply_feed(Instant::now(), update, Local::now()),
                None => break,
            },
            push = pushes.recv() => match push {
                Some(message) => content.apply_message(Instant::now(), &message),
                None => break,
            },
            event = input.recv() => match event {
                Some(ContentInput::Ready) => last_view = None,
                Some(event) => {
                    let effect = handle_input(&mut content, event);
                    if let Some(ContentEffect::CompleteDeadline(deadline)) = effect {
                        let client = Arc::clone(&client);
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = client.complete_deadline(&deadline).await {
                                log::error!(
                                    "Failed to mark deadline {} as complete: {}",
                                    deadline.id,
                                    e
                                );
                                return;
                            }
                            let refreshed = client.fetch().await;
                            let _ = done_tx.send(Completion {
                                deadline_id: deadline.id,
                                refreshed,
                            });
                        });
                    }
                }
                None => break,
            },
            Some(done) = done_rx.recv() => {
                let update = match done.refreshed {
                    Ok(snapshot) => FeedUpdate::Loaded(snapshot),
                    Err(e) => FeedUpdate::Failed(e.to_string()),
                };
                content.apply_feed(Instant::now(), update, Local::now());
                content.deadline_completed(Instant::now(), done.deadline_id);
            },
            _ = clock.tick() => content.tick_wall_clock(Instant::now(), Local::now()),
            _ = sleep_until(deadline) => content.poll(Instant::now()),
        }

        let view = content.view();
        if last_view.as_ref() != Some(&view) {
            if let Err(e) = app.emit_to(target.clone(), events::OVERLAY_VIEW, &view) {
                log::debug!("Failed to emit overlay view: {}", e);
            }
            last_view = Some(view);
        }
    }

    log::debug!("Content session loop for {:?} finished", window);
}

fn handle_input(content: &mut OverlayContent, input: ContentInput) -> Option<ContentEffect> {
    let now = Instant::now();
    match input {
        ContentInput::Ready => None,
        ContentInput::Pointer { node, kind } => {
            content.pointer(now, node, kind);
            None
        }
        ContentInput::Click(node) => content.click(node),
        ContentInput::Rects(rects) => {
            content.set_element_rects(rects.into_iter().map(|r| (r.node, r.rect)));
            None
        }
        ContentInput::Cursor(Some((x, y))) => {
            content.pointer_moved(now, x, y);
            None
        }
        ContentInput::Cursor(None) => {
            content.pointer_left_window(now);
            None
        }
        ContentInput::Blur => {
            content.blur(now);
            None
        }
    }
}
