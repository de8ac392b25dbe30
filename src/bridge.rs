//! Input-routing bridge between the overlay content layer and the host
//!
//! Two typed, fire-and-forget directions:
//! content -> host carries pass-through requests, host -> content carries
//! settings and color pushes. A send into a closed channel (the other side
//! was torn down) is logged and otherwise ignored.

use std::time::Instant;

use tokio::sync::mpsc;

use crate::settings::{ColorsPatch, SettingsPatch};

/// Ask the host to accept (`true`) or forward (`false`) pointer input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassThroughRequest {
    pub accept: bool,
    pub requested_at: Instant,
}

/// Content -> host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    PassThrough(PassThroughRequest),
}

/// Host -> content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentMessage {
    Settings(SettingsPatch),
    Colors(ColorsPatch),
}

/// Content-side sender
#[derive(Debug, Clone)]
pub struct ContentPort {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ContentPort {
    /// Never blocks and never fails loudly.
    pub fn request_pass_through(&self, request: PassThroughRequest) {
        if let Err(e) = self.tx.send(HostMessage::PassThrough(request)) {
            log::warn!(
                "Dropping pass-through request (accept={}): host unavailable ({})",
                request.accept,
                e
            );
        }
    }
}

/// Host-side sender
#[derive(Debug, Clone)]
pub struct HostPort {
    tx: mpsc::UnboundedSender<ContentMessage>,
}

impl HostPort {
    pub fn push_settings(&self, settings: SettingsPatch) -> bool {
        self.push(ContentMessage::Settings(settings))
    }

    pub fn push_colors(&self, colors: ColorsPatch) -> bool {
        self.push(ContentMessage::Colors(colors))
    }

    fn push(&self, message: ContentMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Overlay content unavailable, dropping push: {:?}", e.0);
                false
            }
        }
    }
}

/// Host end: push content messages, receive host messages
pub struct HostEnd {
    pub port: HostPort,
    pub inbox: mpsc::UnboundedReceiver<HostMessage>,
}

/// Content end: send host messages, receive content messages
pub struct ContentEnd {
    pub port: ContentPort,
    pub inbox: mpsc::UnboundedReceiver<ContentMessage>,
}

pub fn channel() -> (HostEnd, ContentEnd) {
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let (content_tx, content_rx) = mpsc::unbounded_channel();
    (
        HostEnd {
            port: HostPort { tx: content_tx },
            inbox: host_rx,
        },
        ContentEnd {
            port: ContentPort { tx: host_tx },
            inbox: content_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_cross_in_both_directions() {
        let (mut host, mut content) = channel();
        let now = Instant::now();

        content.port.request_pass_through(PassThroughRequest {
            accept: true,
            requested_at: now,
        });
        assert_eq!(
            host.inbox.try_recv().unwrap(),
            HostMessage::PassThrough(PassThroughRequest {
                accept: true,
                requested_at: now
            })
        );

        let patch = SettingsPatch {
            widgets_enabled: Some(false),
            ..Default::default()
        };
        assert!(host.port.push_settings(patch.clone()));
        assert_eq!(content.inbox.try_recv().unwrap(), ContentMessage::Settings(patch));
    }

    #[test]
    fn test_send_after_teardown_is_swallowed() {
        let (host, content) = channel();
        drop(host.inbox);
        content.port.request_pass_through(PassThroughRequest {
            accept: false,
            requested_at: Instant::now(),
        });

        let (host, content) = channel();
        drop(content);
        assert!(!host.port.push_colors(ColorsPatch::default()));
    }
}
