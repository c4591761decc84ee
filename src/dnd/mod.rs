//! DnD engine: guest side of drag-and-drop in both directions.
//!
//! HG (host→guest): the host drags into the guest. The engine shows the
//! full-screen detection window, hands the payload to the UI and, for
//! file drops, tells the host where to copy.
//!
//! GH (guest→host): the host asks whether a guest drag is leaving the
//! guest. The engine arms the ungrab watchdog and waits for the UI to
//! report the drag; if nothing arrives in time the query is cancelled.
//!
//! All methods are synchronous state transitions driven by the service
//! loop. Every operation is checked against [`state::transition`] first;
//! an operation that is not valid in the current state runs [`DndEngine::reset`].

pub mod state;
pub mod watchdog;

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineError, Transition};
use crate::ipc::protocol::{DropEffect, Message};
use crate::notify::{Channel, Notifier, UiNotification};
use crate::payload::ClipboardPayload;
use crate::staging::{StagingArea, StagingSlot};
use crate::transport::{GuestMessage, HostEvent, HostSender, TransportSlot};

use state::{DndOp, DndState, transition};
use watchdog::{UNGRAB_TIMEOUT, WatchdogScheduler, WatchdogToken};

/// Width and height of the full-screen detection window's hit area.
pub const DETECTION_WINDOW_WIDTH: i32 = 31;

pub struct DndEngine {
    state: DndState,
    transport: TransportSlot,
    notifier: Notifier,
    staging: StagingSlot,
    watchdog: Box<dyn WatchdogScheduler>,
    /// Token of the outstanding watchdog, if armed.
    armed: Option<WatchdogToken>,
    ungrab_timeout: Duration,
    /// Payload of the current cycle.
    clipboard: ClipboardPayload,
    allowed: bool,
    det_window_shown: bool,
    /// Window id of the Unity detection window while shown.
    unity_window: Option<u32>,
}

impl DndEngine {
    pub fn new(
        outbound: HostSender,
        notifier: Notifier,
        staging: Box<dyn StagingArea>,
        watchdog: Box<dyn WatchdogScheduler>,
    ) -> Self {
        Self {
            state: DndState::Invalid,
            transport: TransportSlot::new(Channel::Dnd, outbound),
            notifier,
            staging: StagingSlot::new(staging),
            watchdog,
            armed: None,
            ungrab_timeout: UNGRAB_TIMEOUT,
            clipboard: ClipboardPayload::new(),
            allowed: true,
            det_window_shown: false,
            unity_window: None,
        }
    }

    pub fn with_ungrab_timeout(mut self, timeout: Duration) -> Self {
        self.ungrab_timeout = timeout;
        self
    }

    pub fn state(&self) -> DndState {
        self.state
    }

    /// Policy switch. Disallowing does not interrupt a cycle in progress.
    pub fn set_allowed(&mut self, allowed: bool) {
        tracing::info!(allowed, "dnd policy changed");
        self.allowed = allowed;
    }

    // -- Transport --

    /// Swap the transport for `version`.
    ///
    /// Equal versions are a no-op. Otherwise the old delegate goes away,
    /// any live cycle is reset, and the engine comes back `Ready` only if
    /// a delegate for `version` exists.
    pub fn on_version_changed(&mut self, version: u32) {
        if version == self.transport.version() {
            tracing::debug!(version, "dnd version unchanged");
            return;
        }

        self.transport.teardown();
        if self.state != DndState::Invalid {
            self.reset();
        }
        self.set_state(DndState::Invalid);

        if self.transport.install(version) {
            self.set_state(DndState::Ready);
        }
    }

    /// Decode a host frame through the transport and act on it.
    pub fn on_host_message(&mut self, msg: Message) {
        if let Some(event) = self.transport.decode(msg) {
            self.dispatch(event);
        }
    }

    pub fn dispatch(&mut self, event: HostEvent) {
        tracing::trace!(state = ?self.state, ?event, "dnd host event");
        match event {
            HostEvent::DragEnter(payload) => self.on_hg_drag_enter(payload),
            HostEvent::DragStart { staging_hint } => self.on_hg_drag_start(staging_hint),
            HostEvent::Cancel => self.on_hg_cancel(),
            HostEvent::Drop => self.on_hg_drop(),
            HostEvent::FileCopyDone {
                success,
                staging_dir,
            } => self.on_file_copy_done(success, staging_dir),
            HostEvent::QueryExiting { x, y } => self.on_query_exiting(x, y),
            HostEvent::UpdateUnityDetWnd { show, window_id } => {
                self.on_update_unity_window(show, window_id)
            }
            HostEvent::UngrabTimeoutAck | HostEvent::GhCancel => self.on_gh_cancel(),
            HostEvent::PrivDragEnter { x, y } => self.on_priv_drag_enter(x, y),
            HostEvent::PrivDragLeave { .. } => self.on_priv_drag_leave(),
            HostEvent::PrivDrop { x, y } => self.on_priv_drop(x, y),
            other => tracing::warn!(event = ?other, "copy-paste event routed to dnd engine"),
        }
    }

    // -- HG --

    fn on_hg_drag_enter(&mut self, payload: ClipboardPayload) {
        if !self.allowed {
            tracing::debug!("host drag-enter ignored, dnd disallowed");
            return;
        }
        let Some(verdict) = self.gate(DndOp::HgDragEnter) else {
            return;
        };

        self.clipboard = payload;
        self.show_det_window(0, 0);
        let centre = DETECTION_WINDOW_WIDTH / 2;
        self.send(GuestMessage::DragEnterDone {
            x: centre,
            y: centre,
        });
        self.apply(verdict);
    }

    fn on_hg_drag_start(&mut self, staging_hint: Option<PathBuf>) {
        if self.gate(DndOp::HgDragStart).is_none() {
            return;
        }

        let staging_dir = if self.clipboard.has_files() {
            match self.staging.claim(staging_hint.as_deref()) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "drag start abandoned");
                    return;
                }
            }
        } else {
            None
        };

        self.notifier.emit(UiNotification::DragStarted {
            payload: self.clipboard.clone(),
            staging_dir,
        });
    }

    /// UI confirms its local drag is underway.
    pub fn confirm_start(&mut self) -> Result<(), EngineError> {
        self.check_live()?;
        let verdict = self.gate_command(DndOp::ConfirmStart)?;
        let sent = self.transport.send(GuestMessage::DragStartDone);
        self.apply(verdict);
        sent
    }

    fn on_hg_cancel(&mut self) {
        let Some(verdict) = self.gate(DndOp::HgCancel) else {
            return;
        };
        self.hg_cancel_path();
        self.apply(verdict);
    }

    fn on_hg_drop(&mut self) {
        let Some(verdict) = self.gate(DndOp::HgDrop) else {
            return;
        };

        if self.clipboard.has_files() {
            // The detection window stays flagged as shown while the host
            // copies; the next hide or reset takes it down.
            self.notifier.emit(UiNotification::SourceDropped);
            match self.staging.current().map(|p| p.to_path_buf()) {
                Some(staging_dir) => self.send(GuestMessage::DropDone { staging_dir }),
                None => tracing::warn!("file drop without a staging directory"),
            }
        } else {
            // No completion goes to the host for non-file drops.
            self.hide_det_window();
        }
        self.apply(verdict);
    }

    fn on_file_copy_done(&mut self, success: bool, reported: Option<PathBuf>) {
        if self.gate(DndOp::FileCopyDone).is_none() {
            return;
        }
        if let (Some(reported), Some(current)) = (reported.as_deref(), self.staging.current()) {
            if reported != current {
                tracing::debug!(
                    reported = %reported.display(),
                    current = %current.display(),
                    "host reported a different staging directory"
                );
            }
        }
        self.staging.finish(success);
        self.notifier.emit(UiNotification::FileCopyDone {
            channel: Channel::Dnd,
            success,
        });
    }

    /// Forward a drop-effect hint to the host.
    pub fn set_feedback(&mut self, effect: DropEffect) -> Result<(), EngineError> {
        self.check_live()?;
        self.gate_command(DndOp::SetFeedback)?;
        self.transport.send(GuestMessage::Feedback(effect))
    }

    // -- GH --

    fn on_query_exiting(&mut self, x: i32, y: i32) {
        if !self.allowed {
            tracing::debug!("query-exiting ignored, dnd disallowed");
            return;
        }
        let Some(verdict) = self.gate(DndOp::QueryExiting) else {
            return;
        };

        self.clipboard.clear();
        self.show_det_window(x, y);
        self.arm_watchdog();
        self.apply(verdict);
    }

    /// UI reports a guest drag leaving the guest, carrying `payload`.
    pub fn drag_enter(&mut self, payload: ClipboardPayload) -> Result<(), EngineError> {
        self.check_live()?;
        if !self.allowed {
            return Err(EngineError::NotAllowed);
        }
        let verdict = self.gate_command(DndOp::GhDragEnter {
            overlay: self.unity_window.is_some(),
        })?;

        self.disarm_watchdog();
        self.clipboard = payload.clone();
        let sent = self.transport.send(GuestMessage::GhDragEnter(payload));
        self.apply(verdict);
        sent
    }

    /// A watchdog armed by this engine fired.
    ///
    /// Tokens other than the outstanding one are stale and ignored.
    pub fn on_watchdog_fired(&mut self, token: WatchdogToken) {
        self.watchdog.disarm(token);
        if self.armed != Some(token) {
            tracing::debug!(?token, "stale watchdog fire ignored");
            return;
        }
        self.armed = None;

        if self.gate(DndOp::WatchdogFired).is_none() {
            return;
        }
        tracing::info!("ungrab timed out");
        self.send(GuestMessage::UngrabTimeout);
        self.gh_cancel_path();
    }

    fn on_gh_cancel(&mut self) {
        if self.gate(DndOp::GhCancel).is_none() {
            return;
        }
        self.gh_cancel_path();
    }

    fn on_update_unity_window(&mut self, show: bool, window_id: u32) {
        if self.gate(DndOp::UnityWindow { show }).is_none() {
            return;
        }
        if show {
            self.unity_window = Some(window_id);
            self.notifier
                .emit(UiNotification::UnityDetectionWindow { show, window_id });
        } else {
            self.hide_unity_window();
        }
    }

    fn on_priv_drag_enter(&mut self, x: i32, y: i32) {
        let Some(verdict) = self.gate(DndOp::PrivDragEnter) else {
            return;
        };
        self.show_det_window(x, y);
        self.apply(verdict);
    }

    fn on_priv_drag_leave(&mut self) {
        let Some(verdict) = self.gate(DndOp::PrivDragLeave) else {
            return;
        };
        self.hide_det_window();
        self.apply(verdict);
    }

    fn on_priv_drop(&mut self, x: i32, y: i32) {
        let Some(verdict) = self.gate(DndOp::PrivDrop) else {
            return;
        };
        self.notifier.emit(UiNotification::PrivateDrop { x, y });
        self.hide_det_window();
        self.apply(verdict);
    }

    // -- Reset --

    /// Abort whatever is in progress and return to `Ready`.
    ///
    /// Runs the HG cancel path then the GH cancel path, and emits exactly
    /// one reset notification.
    pub fn reset(&mut self) {
        tracing::debug!(state = ?self.state, "dnd reset");
        self.hg_cancel_path();
        self.gh_cancel_path();
        self.notifier.emit(UiNotification::Reset {
            channel: Channel::Dnd,
        });
    }

    fn hg_cancel_path(&mut self) {
        if self.state.is_hg() {
            self.notifier.emit(UiNotification::SourceCancelled);
        }
        self.hide_det_window();
        self.staging.discard();
    }

    fn gh_cancel_path(&mut self) {
        self.hide_det_window();
        self.hide_unity_window();
        self.disarm_watchdog();
        self.set_state(DndState::Ready);
    }

    // -- Helpers --

    /// Look `op` up in the table. Returns the verdict to act on, or `None`
    /// when the operation ends here (ignored, or recovered by a reset).
    fn gate(&mut self, op: DndOp) -> Option<Transition<DndState>> {
        let verdict = transition(self.state, op);
        match verdict {
            Transition::Reset => {
                tracing::warn!(state = ?self.state, ?op, "operation not valid in state, resetting");
                self.reset();
                None
            }
            Transition::ResetFirst => {
                tracing::warn!(state = ?self.state, ?op, "resetting before operation");
                self.reset();
                Some(verdict)
            }
            Transition::Ignore => {
                tracing::debug!(state = ?self.state, ?op, "operation ignored");
                None
            }
            Transition::Stay | Transition::To(_) => Some(verdict),
        }
    }

    fn gate_command(&mut self, op: DndOp) -> Result<Transition<DndState>, EngineError> {
        self.gate(op).ok_or(EngineError::Recovered)
    }

    fn check_live(&self) -> Result<(), EngineError> {
        if !self.transport.is_connected() {
            return Err(EngineError::NoTransport);
        }
        if self.state == DndState::Invalid {
            return Err(EngineError::Inert);
        }
        Ok(())
    }

    fn apply(&mut self, verdict: Transition<DndState>) {
        if let Transition::To(next) = verdict {
            self.set_state(next);
        }
    }

    fn set_state(&mut self, next: DndState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "dnd state");
            self.state = next;
        }
    }

    fn send(&mut self, msg: GuestMessage) {
        if let Err(e) = self.transport.send(msg) {
            tracing::warn!(error = %e, "dnd message to host not sent");
        }
    }

    fn show_det_window(&mut self, x: i32, y: i32) {
        self.det_window_shown = true;
        self.notifier
            .emit(UiNotification::DetectionWindow { show: true, x, y });
    }

    fn hide_det_window(&mut self) {
        if std::mem::take(&mut self.det_window_shown) {
            self.notifier.emit(UiNotification::DetectionWindow {
                show: false,
                x: 0,
                y: 0,
            });
        }
    }

    fn hide_unity_window(&mut self) {
        if let Some(window_id) = self.unity_window.take() {
            self.notifier.emit(UiNotification::UnityDetectionWindow {
                show: false,
                window_id,
            });
        }
    }

    fn arm_watchdog(&mut self) {
        self.disarm_watchdog();
        self.armed = Some(self.watchdog.arm(self.ungrab_timeout));
    }

    fn disarm_watchdog(&mut self) {
        if let Some(token) = self.armed.take() {
            self.watchdog.disarm(token);
        }
    }
}

impl std::fmt::Debug for DndEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DndEngine")
            .field("state", &self.state)
            .field("version", &self.transport.version())
            .field("generation", &self.transport.generation())
            .field("staging", &self.staging)
            .field("armed", &self.armed)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}
