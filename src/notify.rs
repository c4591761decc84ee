//! Notifications from the engines to the local UI.
//!
//! Fire-and-forget: an engine pushes a [`UiNotification`] into an
//! unbounded channel and moves on. The service loop fans them out to
//! every attached UI connection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::payload::ClipboardPayload;

/// Which engine a shared notification kind came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Dnd,
    CopyPaste,
}

/// Outbound events for the local UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiNotification {
    /// Host delivered a clipboard; `staging_dir` is set when files follow.
    NewClipboard {
        payload: ClipboardPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        staging_dir: Option<PathBuf>,
    },
    /// Host asked for the guest clipboard.
    ClipboardSourceRequested,
    FileCopyDone {
        channel: Channel,
        success: bool,
    },
    SourceDropped,
    SourceCancelled,
    /// HG drag began; the UI must call `confirm_drag_start` once its
    /// local drag is underway.
    DragStarted {
        payload: ClipboardPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        staging_dir: Option<PathBuf>,
    },
    DetectionWindow {
        show: bool,
        x: i32,
        y: i32,
    },
    UnityDetectionWindow {
        show: bool,
        window_id: u32,
    },
    PrivateDrop {
        x: i32,
        y: i32,
    },
    Reset {
        channel: Channel,
    },
}

/// Sending half held by each engine.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<UiNotification>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<UiNotification>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, notification: UiNotification) {
        tracing::trace!(?notification, "ui notification");
        if self.tx.send(notification).is_err() {
            tracing::debug!("ui notification dropped, loop gone");
        }
    }
}
