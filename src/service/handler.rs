//! Message dispatch.
//!
//! Pure logic, no I/O. Host frames are fire-and-forget and produce no
//! reply unless they are rejected. UI requests always get a `response`
//! echoing their `id`.

use crate::engine::EngineError;
use crate::ipc::protocol::{Message, PROTOCOL_VERSION, Role, Status};
use crate::notify::Channel;

use super::state::{ConnectionId, ServiceState};

/// Dispatch one decoded frame from `connection_id`.
///
/// Returns the frame to send back to the same connection, if any.
///
/// Enforces:
/// - Host-channel frames and `capabilities` only from the host
/// - UI requests only from UI connections
/// - Guest-originated variants → `unknown_type`
pub fn handle_message(
    state: &mut ServiceState,
    request: Message,
    connection_id: ConnectionId,
) -> Option<Message> {
    if let Message::Hello { version, role } = request {
        return Some(handle_hello(state, version, role, connection_id));
    }

    let role = state.role(connection_id);

    if let Some(channel) = request.host_channel() {
        if role != Some(Role::Host) {
            return Some(error_frame("unknown_type"));
        }
        match channel {
            Channel::Dnd => state.dnd.on_host_message(request),
            Channel::CopyPaste => state.cp.on_host_message(request),
        }
        return None;
    }

    match request {
        Message::Capabilities {
            dnd_version,
            cp_version,
        } => {
            if role != Some(Role::Host) {
                return Some(error_frame("unknown_type"));
            }
            tracing::info!(dnd_version, cp_version, "host capabilities");
            state.dnd.on_version_changed(dnd_version);
            state.cp.on_version_changed(cp_version);
            tracing::debug!(dnd = ?state.dnd.state(), cp = ?state.cp.state(), "engines updated");
            None
        }

        // -- UI requests --
        Message::UiPushClipboard { id, payload } => {
            ui_request(state, role, id, |s| s.cp.push_clipboard(payload))
        }
        Message::UiLocalClipboard { id, payload } => ui_request(state, role, id, |s| {
            s.cp.source_mut().update(payload);
            Ok(())
        }),
        Message::UiRequestRemoteClipboard { id } => {
            ui_request(state, role, id, |s| s.cp.request_remote_clipboard())
        }
        Message::UiConfirmDragStart { id } => {
            ui_request(state, role, id, |s| s.dnd.confirm_start())
        }
        Message::UiSetFeedback { id, effect } => {
            ui_request(state, role, id, |s| s.dnd.set_feedback(effect))
        }
        Message::UiDragEnter { id, payload } => {
            ui_request(state, role, id, |s| s.dnd.drag_enter(payload))
        }
        Message::UiSetAllowed {
            id,
            channel,
            allowed,
        } => ui_request(state, role, id, |s| {
            match channel {
                Channel::Dnd => s.dnd.set_allowed(allowed),
                Channel::CopyPaste => s.cp.set_allowed(allowed),
            }
            Ok(())
        }),

        // -- Guest-originated variants: never valid as requests --
        other => {
            tracing::debug!(?connection_id, frame = ?other, "guest-originated frame received");
            Some(error_frame("unknown_type"))
        }
    }
}

fn handle_hello(
    state: &mut ServiceState,
    version: u32,
    role: Role,
    connection_id: ConnectionId,
) -> Message {
    if version != PROTOCOL_VERSION {
        return hello_ack(Err("version_mismatch"));
    }
    let result = state.add_connection(connection_id, role);
    if result.is_ok() {
        tracing::info!(?connection_id, ?role, "handshake complete");
    }
    hello_ack(result)
}

fn ui_request(
    state: &mut ServiceState,
    role: Option<Role>,
    id: u32,
    op: impl FnOnce(&mut ServiceState) -> Result<(), EngineError>,
) -> Option<Message> {
    if role != Some(Role::Ui) {
        return Some(response(id, Err("unknown_type")));
    }
    let result = op(state).map_err(|e| {
        tracing::debug!(id, error = %e, "ui request failed");
        e.reason()
    });
    Some(response(id, result))
}

fn hello_ack(result: Result<(), &'static str>) -> Message {
    match result {
        Ok(()) => Message::HelloAck {
            status: Status::Ok,
            error: None,
        },
        Err(reason) => Message::HelloAck {
            status: Status::Error,
            error: Some(reason.into()),
        },
    }
}

fn response(id: u32, result: Result<(), &'static str>) -> Message {
    match result {
        Ok(()) => Message::Response {
            id,
            status: Status::Ok,
            error: None,
        },
        Err(reason) => Message::Response {
            id,
            status: Status::Error,
            error: Some(reason.into()),
        },
    }
}

fn error_frame(reason: &str) -> Message {
    Message::Error {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::copypaste::CpState;
    use crate::dnd::state::DndState;
    use crate::dnd::watchdog::testing::ManualWatchdog;
    use crate::ipc::protocol::DropEffect;
    use crate::notify::{Notifier, UiNotification};
    use crate::payload::{ClipboardFormat, ClipboardPayload};
    use crate::service::ServiceConfig;

    struct Fixture {
        state: ServiceState,
        host_rx: mpsc::UnboundedReceiver<Message>,
        ui_rx: mpsc::UnboundedReceiver<UiNotification>,
        host: ConnectionId,
        ui: ConnectionId,
        _dir: tempfile::TempDir,
    }

    /// Host and UI attached, host announced V3 on both channels.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let config = ServiceConfig::new(dir.path().join("guest.sock"))
            .with_staging_root(dir.path().join("staging"));
        let mut state = ServiceState::new(
            &config,
            host_tx,
            Notifier::new(ui_tx),
            Box::new(ManualWatchdog::default()),
        );
        let host = ConnectionId::new();
        let ui = ConnectionId::new();
        hello(&mut state, host, Role::Host);
        hello(&mut state, ui, Role::Ui);
        assert_eq!(
            handle_message(
                &mut state,
                Message::Capabilities {
                    dnd_version: 3,
                    cp_version: 3
                },
                host
            ),
            None
        );
        Fixture {
            state,
            host_rx,
            ui_rx,
            host,
            ui,
            _dir: dir,
        }
    }

    fn hello(state: &mut ServiceState, id: ConnectionId, role: Role) {
        let ack = handle_message(
            state,
            Message::Hello {
                version: PROTOCOL_VERSION,
                role,
            },
            id,
        );
        assert_eq!(
            ack,
            Some(Message::HelloAck {
                status: Status::Ok,
                error: None
            })
        );
    }

    fn text() -> ClipboardPayload {
        ClipboardPayload::new().with(ClipboardFormat::Text, "hello")
    }

    #[test]
    fn capabilities_bring_engines_up() {
        let f = fixture();
        assert_eq!(f.state.dnd.state(), DndState::Ready);
        assert_eq!(f.state.cp.state(), CpState::Ready);
    }

    #[test]
    fn unsupported_capabilities_leave_engines_inert() {
        let mut f = fixture();
        handle_message(
            &mut f.state,
            Message::Capabilities {
                dnd_version: 2,
                cp_version: 0,
            },
            f.host,
        );
        assert_eq!(f.state.dnd.state(), DndState::Invalid);
        assert_eq!(f.state.cp.state(), CpState::Invalid);

        let resp = handle_message(
            &mut f.state,
            Message::UiPushClipboard {
                id: 4,
                payload: text(),
            },
            f.ui,
        );
        assert_eq!(
            resp,
            Some(Message::Response {
                id: 4,
                status: Status::Error,
                error: Some("no_transport".into())
            })
        );
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::Hello {
                version: 999,
                role: Role::Ui,
            },
            ConnectionId::new(),
        );
        assert_eq!(
            resp,
            Some(Message::HelloAck {
                status: Status::Error,
                error: Some("version_mismatch".into())
            })
        );
    }

    #[test]
    fn second_host_rejected() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::Hello {
                version: PROTOCOL_VERSION,
                role: Role::Host,
            },
            ConnectionId::new(),
        );
        assert_eq!(
            resp,
            Some(Message::HelloAck {
                status: Status::Error,
                error: Some("host_already_connected".into())
            })
        );
    }

    #[test]
    fn repeated_hello_keeps_original_role() {
        let mut f = fixture();
        let rejected = Some(Message::HelloAck {
            status: Status::Error,
            error: Some("already_handshaken".into()),
        });

        let resp = handle_message(
            &mut f.state,
            Message::Hello {
                version: PROTOCOL_VERSION,
                role: Role::Ui,
            },
            f.host,
        );
        assert_eq!(resp, rejected);
        let resp = handle_message(
            &mut f.state,
            Message::Hello {
                version: PROTOCOL_VERSION,
                role: Role::Host,
            },
            f.ui,
        );
        assert_eq!(resp, rejected);

        // Host still drives the engines; the UI still cannot.
        let resp = handle_message(
            &mut f.state,
            Message::DndDragEnter {
                session: 1,
                payload: text(),
            },
            f.host,
        );
        assert_eq!(resp, None);
        assert_eq!(f.state.dnd.state(), DndState::Entering);
        let resp = handle_message(&mut f.state, Message::DndCancel { session: 1 }, f.ui);
        assert_eq!(resp, Some(error_frame("unknown_type")));
        assert_eq!(f.state.host(), Some(f.host));
    }

    #[test]
    fn host_frames_route_to_engines_without_reply() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::DndDragEnter {
                session: 2,
                payload: text(),
            },
            f.host,
        );
        assert_eq!(resp, None);
        assert_eq!(f.state.dnd.state(), DndState::Entering);
        assert!(matches!(
            f.host_rx.try_recv().unwrap(),
            Message::DndDragEnterDone { session: 2, .. }
        ));
        assert_eq!(
            f.ui_rx.try_recv().unwrap(),
            UiNotification::DetectionWindow {
                show: true,
                x: 0,
                y: 0
            }
        );
    }

    #[test]
    fn host_frames_from_ui_rejected() {
        let mut f = fixture();
        let resp = handle_message(&mut f.state, Message::DndDrop { session: 1 }, f.ui);
        assert_eq!(resp, Some(error_frame("unknown_type")));
        let resp = handle_message(
            &mut f.state,
            Message::Capabilities {
                dnd_version: 0,
                cp_version: 0,
            },
            f.ui,
        );
        assert_eq!(resp, Some(error_frame("unknown_type")));
        assert_eq!(f.state.dnd.state(), DndState::Ready);
    }

    #[test]
    fn ui_requests_from_host_rejected() {
        let mut f = fixture();
        let resp = handle_message(&mut f.state, Message::UiConfirmDragStart { id: 3 }, f.host);
        assert_eq!(
            resp,
            Some(Message::Response {
                id: 3,
                status: Status::Error,
                error: Some("unknown_type".into())
            })
        );
    }

    #[test]
    fn push_clipboard_reaches_host() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::UiPushClipboard {
                id: 1,
                payload: text(),
            },
            f.ui,
        );
        assert_eq!(
            resp,
            Some(Message::Response {
                id: 1,
                status: Status::Ok,
                error: None
            })
        );
        assert_eq!(
            f.host_rx.try_recv().unwrap(),
            Message::CpSendClip {
                session: 0,
                payload: text()
            }
        );
    }

    #[test]
    fn local_clipboard_answers_host_request() {
        let mut f = fixture();
        handle_message(
            &mut f.state,
            Message::UiLocalClipboard {
                id: 1,
                payload: text(),
            },
            f.ui,
        );
        handle_message(&mut f.state, Message::CpRequestClip { session: 8 }, f.host);
        assert_eq!(
            f.host_rx.try_recv().unwrap(),
            Message::CpSendClip {
                session: 8,
                payload: text()
            }
        );
    }

    #[test]
    fn state_violation_reports_state_reset() {
        let mut f = fixture();
        let resp = handle_message(&mut f.state, Message::UiConfirmDragStart { id: 9 }, f.ui);
        assert_eq!(
            resp,
            Some(Message::Response {
                id: 9,
                status: Status::Error,
                error: Some("state_reset".into())
            })
        );
    }

    #[test]
    fn set_allowed_gates_drag_enter() {
        let mut f = fixture();
        handle_message(
            &mut f.state,
            Message::UiSetAllowed {
                id: 1,
                channel: Channel::Dnd,
                allowed: false,
            },
            f.ui,
        );
        handle_message(
            &mut f.state,
            Message::DndQueryExiting {
                session: 1,
                x: 0,
                y: 0,
            },
            f.host,
        );
        assert_eq!(f.state.dnd.state(), DndState::Ready);

        let resp = handle_message(
            &mut f.state,
            Message::UiDragEnter {
                id: 2,
                payload: text(),
            },
            f.ui,
        );
        assert_eq!(
            resp,
            Some(Message::Response {
                id: 2,
                status: Status::Error,
                error: Some("not_allowed".into())
            })
        );
    }

    #[test]
    fn feedback_forwarded_during_drag() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::UiSetFeedback {
                id: 5,
                effect: DropEffect::Move,
            },
            f.ui,
        );
        assert!(matches!(
            resp,
            Some(Message::Response {
                status: Status::Ok,
                ..
            })
        ));
        assert_eq!(
            f.host_rx.try_recv().unwrap(),
            Message::DndFeedback {
                session: 0,
                effect: DropEffect::Move
            }
        );
    }

    #[test]
    fn guest_originated_frames_rejected() {
        let mut f = fixture();
        let resp = handle_message(
            &mut f.state,
            Message::DndUngrabTimeout { session: 1 },
            f.host,
        );
        assert_eq!(resp, Some(error_frame("unknown_type")));
    }
}
