//! CopyPaste engine: clipboard sharing between guest and host.
//!
//! Guest→host is fire-and-forget: the UI pushes a payload and the engine
//! forwards it. Host→guest arrives as a delivered payload, which is stored
//! and announced to the UI. Payloads carrying files claim a staging
//! directory that the host copies into.

use crate::engine::{EngineError, Transition};
use crate::ipc::protocol::Message;
use crate::notify::{Channel, Notifier, UiNotification};
use crate::payload::ClipboardPayload;
use crate::staging::{StagingArea, StagingSlot};
use crate::transport::{GuestMessage, HostEvent, HostSender, TransportSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpState {
    /// No supported transport. The engine is inert.
    Invalid,
    Ready,
    /// The UI asked for the host clipboard; waiting for delivery.
    RequestingClipboard,
}

impl CpState {
    #[cfg(test)]
    pub const ALL: [CpState; 3] = [
        CpState::Invalid,
        CpState::Ready,
        CpState::RequestingClipboard,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpOp {
    Push,
    RequestRemote,
    HostRequest,
    Delivered,
    FileCopyDone,
}

impl CpOp {
    #[cfg(test)]
    pub const ALL: [CpOp; 5] = [
        CpOp::Push,
        CpOp::RequestRemote,
        CpOp::HostRequest,
        CpOp::Delivered,
        CpOp::FileCopyDone,
    ];
}

/// Look up what `op` does in `state`.
///
/// Deliveries and copy results are still accepted while `Invalid` so a
/// transfer that completes during a transport swap is not lost.
pub fn transition(state: CpState, op: CpOp) -> Transition<CpState> {
    use CpState::*;

    match (op, state) {
        (CpOp::Delivered, Invalid) => Transition::Stay,
        (CpOp::Delivered, _) => Transition::To(Ready),
        (CpOp::FileCopyDone, _) => Transition::Stay,
        (_, Invalid) => Transition::Ignore,
        (CpOp::Push, _) => Transition::Stay,
        (CpOp::HostRequest, _) => Transition::Stay,
        (CpOp::RequestRemote, Ready) => Transition::To(RequestingClipboard),
        (CpOp::RequestRemote, RequestingClipboard) => Transition::Reset,
    }
}

/// Where the engine gets the guest clipboard when the host asks for it.
pub trait ClipboardSource: Send {
    /// The current guest clipboard, or `None` if the UI will answer later
    /// by pushing.
    fn snapshot(&mut self) -> Option<ClipboardPayload>;
}

/// Source backed by the last payload the UI reported as the local
/// clipboard.
#[derive(Debug, Default)]
pub struct CachedClipboard {
    latest: Option<ClipboardPayload>,
}

impl CachedClipboard {
    pub fn update(&mut self, payload: ClipboardPayload) {
        self.latest = if payload.is_empty() {
            None
        } else {
            Some(payload)
        };
    }
}

impl ClipboardSource for CachedClipboard {
    fn snapshot(&mut self) -> Option<ClipboardPayload> {
        self.latest.clone()
    }
}

pub struct CopyPasteEngine<S> {
    state: CpState,
    transport: TransportSlot,
    notifier: Notifier,
    staging: StagingSlot,
    source: S,
    clipboard: ClipboardPayload,
    allowed: bool,
}

impl<S: ClipboardSource> CopyPasteEngine<S> {
    pub fn new(
        outbound: HostSender,
        notifier: Notifier,
        staging: Box<dyn StagingArea>,
        source: S,
    ) -> Self {
        Self {
            state: CpState::Invalid,
            transport: TransportSlot::new(Channel::CopyPaste, outbound),
            notifier,
            staging: StagingSlot::new(staging),
            source,
            clipboard: ClipboardPayload::new(),
            allowed: true,
        }
    }

    pub fn state(&self) -> CpState {
        self.state
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Policy switch. Disallowing abandons an outstanding remote
    /// request, since its delivery will be ignored.
    pub fn set_allowed(&mut self, allowed: bool) {
        tracing::info!(allowed, "copy-paste policy changed");
        self.allowed = allowed;
        if !allowed && self.state == CpState::RequestingClipboard {
            tracing::debug!("outstanding clipboard request abandoned");
            self.set_state(CpState::Ready);
        }
    }

    /// Swap the transport for `version`. See [`crate::dnd::DndEngine::on_version_changed`].
    pub fn on_version_changed(&mut self, version: u32) {
        if version == self.transport.version() {
            tracing::debug!(version, "copy-paste version unchanged");
            return;
        }

        self.transport.teardown();
        if self.state != CpState::Invalid {
            self.reset();
        }
        self.set_state(CpState::Invalid);

        if self.transport.install(version) {
            self.set_state(CpState::Ready);
        }
    }

    pub fn on_host_message(&mut self, msg: Message) {
        if let Some(event) = self.transport.decode(msg) {
            self.dispatch(event);
        }
    }

    pub fn dispatch(&mut self, event: HostEvent) {
        tracing::trace!(state = ?self.state, ?event, "copy-paste host event");
        match event {
            HostEvent::ClipboardRequest => self.on_host_request(),
            HostEvent::ClipboardDelivered(payload) => self.on_delivered(payload),
            HostEvent::CpFileCopyDone { success, .. } => self.on_file_copy_done(success),
            other => tracing::warn!(event = ?other, "dnd event routed to copy-paste engine"),
        }
    }

    /// Send the guest clipboard to the host.
    pub fn push_clipboard(&mut self, payload: ClipboardPayload) -> Result<(), EngineError> {
        self.check_live()?;
        if !self.allowed {
            return Err(EngineError::NotAllowed);
        }
        self.gate_command(CpOp::Push)?;

        self.clipboard = payload.clone();
        self.transport.send(GuestMessage::SendClipboard(payload))
    }

    /// Ask the host for its clipboard. The answer arrives as a delivery.
    pub fn request_remote_clipboard(&mut self) -> Result<(), EngineError> {
        self.check_live()?;
        if !self.allowed {
            return Err(EngineError::NotAllowed);
        }
        let verdict = self.gate_command(CpOp::RequestRemote)?;
        let sent = self.transport.send(GuestMessage::RequestClipboard);
        self.apply(verdict);
        sent
    }

    fn on_host_request(&mut self) {
        if !self.allowed {
            tracing::debug!("host clipboard request ignored, copy-paste disallowed");
            return;
        }
        if self.gate(CpOp::HostRequest).is_none() {
            return;
        }

        self.notifier.emit(UiNotification::ClipboardSourceRequested);
        match self.source.snapshot() {
            Some(payload) => {
                if let Err(e) = self.push_clipboard(payload) {
                    tracing::warn!(error = %e, "clipboard answer not sent");
                }
            }
            None => tracing::debug!("clipboard answer deferred to ui"),
        }
    }

    fn on_delivered(&mut self, payload: ClipboardPayload) {
        if !self.allowed {
            tracing::debug!("clipboard delivery ignored, copy-paste disallowed");
            return;
        }
        let Some(verdict) = self.gate(CpOp::Delivered) else {
            return;
        };

        let staging_dir = if payload.has_files() {
            match self.staging.claim(None) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "clipboard delivery abandoned");
                    return;
                }
            }
        } else {
            None
        };

        self.clipboard = payload;
        let staging_dir = match staging_dir {
            Some(path) => {
                match self.transport.send(GuestMessage::RequestFiles {
                    staging_dir: path.clone(),
                }) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = %e, "file request not sent");
                        self.staging.discard();
                        None
                    }
                }
            }
            None => None,
        };

        self.notifier.emit(UiNotification::NewClipboard {
            payload: self.clipboard.clone(),
            staging_dir,
        });
        self.apply(verdict);
    }

    fn on_file_copy_done(&mut self, success: bool) {
        if self.gate(CpOp::FileCopyDone).is_none() {
            return;
        }
        self.staging.finish(success);
        self.notifier.emit(UiNotification::FileCopyDone {
            channel: Channel::CopyPaste,
            success,
        });
    }

    /// Drop any transfer in progress and return to `Ready`.
    pub fn reset(&mut self) {
        tracing::debug!(state = ?self.state, "copy-paste reset");
        self.staging.discard();
        self.set_state(CpState::Ready);
        self.notifier.emit(UiNotification::Reset {
            channel: Channel::CopyPaste,
        });
    }

    fn gate(&mut self, op: CpOp) -> Option<Transition<CpState>> {
        let verdict = transition(self.state, op);
        match verdict {
            Transition::Reset => {
                tracing::warn!(state = ?self.state, ?op, "operation not valid in state, resetting");
                self.reset();
                None
            }
            Transition::ResetFirst => {
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

    fn gate_command(&mut self, op: CpOp) -> Result<Transition<CpState>, EngineError> {
        self.gate(op).ok_or(EngineError::Recovered)
    }

    fn check_live(&self) -> Result<(), EngineError> {
        if !self.transport.is_connected() {
            return Err(EngineError::NoTransport);
        }
        if self.state == CpState::Invalid {
            return Err(EngineError::Inert);
        }
        Ok(())
    }

    fn apply(&mut self, verdict: Transition<CpState>) {
        if let Transition::To(next) = verdict {
            self.set_state(next);
        }
    }

    fn set_state(&mut self, next: CpState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "copy-paste state");
            self.state = next;
        }
    }
}

impl<S> std::fmt::Debug for CopyPasteEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyPasteEngine")
            .field("state", &self.state)
            .field("version", &self.transport.version())
            .field("generation", &self.transport.generation())
            .field("staging", &self.staging)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}
