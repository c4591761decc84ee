//! Wire message types for the guest service socket.
//!
//! All frames are MessagePack maps tagged on `type`. Three families share
//! the socket: the handshake, host-channel traffic (V3 DnD and CopyPaste
//! RPCs, fire-and-forget, stamped with the host's `session`), and UI
//! traffic (requests carry an `id` that the `response` echoes).

use serde::{Deserialize, Serialize};

use crate::notify::{Channel, UiNotification};
use crate::payload::ClipboardPayload;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello { version: u32, role: Role },

    #[serde(rename = "hello_ack")]
    HelloAck {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Host: version negotiation --
    #[serde(rename = "capabilities")]
    Capabilities { dnd_version: u32, cp_version: u32 },

    // -- Host → guest: DnD --
    #[serde(rename = "dnd_drag_enter")]
    DndDragEnter {
        session: u32,
        payload: ClipboardPayload,
    },
    #[serde(rename = "dnd_drag_start")]
    DndDragStart {
        session: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        staging_dir: Option<String>,
    },
    #[serde(rename = "dnd_cancel")]
    DndCancel { session: u32 },
    #[serde(rename = "dnd_drop")]
    DndDrop { session: u32 },
    #[serde(rename = "dnd_file_copy_done")]
    DndFileCopyDone {
        session: u32,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        staging_dir: Option<String>,
    },
    #[serde(rename = "dnd_query_exiting")]
    DndQueryExiting { session: u32, x: i32, y: i32 },
    #[serde(rename = "dnd_update_unity_det_wnd")]
    DndUpdateUnityDetWnd {
        session: u32,
        show: bool,
        window_id: u32,
    },
    #[serde(rename = "dnd_ungrab_timeout_ack")]
    DndUngrabTimeoutAck { session: u32 },
    #[serde(rename = "dnd_gh_cancel")]
    DndGhCancel { session: u32 },
    #[serde(rename = "dnd_priv_drag_enter")]
    DndPrivDragEnter { session: u32, x: i32, y: i32 },
    #[serde(rename = "dnd_priv_drag_leave")]
    DndPrivDragLeave { session: u32, x: i32, y: i32 },
    #[serde(rename = "dnd_priv_drop")]
    DndPrivDrop { session: u32, x: i32, y: i32 },

    // -- Guest → host: DnD --
    #[serde(rename = "dnd_drag_enter_done")]
    DndDragEnterDone { session: u32, x: i32, y: i32 },
    #[serde(rename = "dnd_drag_start_done")]
    DndDragStartDone { session: u32 },
    #[serde(rename = "dnd_drop_done")]
    DndDropDone { session: u32, staging_dir: String },
    #[serde(rename = "dnd_feedback")]
    DndFeedback { session: u32, effect: DropEffect },
    #[serde(rename = "dnd_ungrab_timeout")]
    DndUngrabTimeout { session: u32 },
    #[serde(rename = "dnd_gh_drag_enter")]
    DndGhDragEnter {
        session: u32,
        payload: ClipboardPayload,
    },

    // -- Host → guest: CopyPaste --
    #[serde(rename = "cp_request_clip")]
    CpRequestClip { session: u32 },
    #[serde(rename = "cp_clip_delivered")]
    CpClipDelivered {
        session: u32,
        payload: ClipboardPayload,
    },
    #[serde(rename = "cp_file_copy_done")]
    CpFileCopyDone {
        session: u32,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        staging_dir: Option<String>,
    },

    // -- Guest → host: CopyPaste --
    #[serde(rename = "cp_send_clip")]
    CpSendClip {
        session: u32,
        payload: ClipboardPayload,
    },
    #[serde(rename = "cp_request_remote_clip")]
    CpRequestRemoteClip { session: u32 },
    #[serde(rename = "cp_request_files")]
    CpRequestFiles { session: u32, staging_dir: String },

    // -- UI → guest --
    #[serde(rename = "ui_push_clipboard")]
    UiPushClipboard { id: u32, payload: ClipboardPayload },
    #[serde(rename = "ui_local_clipboard")]
    UiLocalClipboard { id: u32, payload: ClipboardPayload },
    #[serde(rename = "ui_request_remote_clipboard")]
    UiRequestRemoteClipboard { id: u32 },
    #[serde(rename = "ui_confirm_drag_start")]
    UiConfirmDragStart { id: u32 },
    #[serde(rename = "ui_set_feedback")]
    UiSetFeedback { id: u32, effect: DropEffect },
    #[serde(rename = "ui_drag_enter")]
    UiDragEnter { id: u32, payload: ClipboardPayload },
    #[serde(rename = "ui_set_allowed")]
    UiSetAllowed {
        id: u32,
        channel: Channel,
        allowed: bool,
    },

    // -- Guest → UI --
    #[serde(rename = "notify")]
    Notify { notification: UiNotification },

    #[serde(rename = "response")]
    Response {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Reply to a frame whose `type` is not understood.
    #[serde(rename = "error")]
    Error { reason: String },
}

impl Message {
    /// The host-channel engine this frame belongs to, if any.
    pub fn host_channel(&self) -> Option<Channel> {
        match self {
            Message::DndDragEnter { .. }
            | Message::DndDragStart { .. }
            | Message::DndCancel { .. }
            | Message::DndDrop { .. }
            | Message::DndFileCopyDone { .. }
            | Message::DndQueryExiting { .. }
            | Message::DndUpdateUnityDetWnd { .. }
            | Message::DndUngrabTimeoutAck { .. }
            | Message::DndGhCancel { .. }
            | Message::DndPrivDragEnter { .. }
            | Message::DndPrivDragLeave { .. }
            | Message::DndPrivDrop { .. } => Some(Channel::Dnd),
            Message::CpRequestClip { .. }
            | Message::CpClipDelivered { .. }
            | Message::CpFileCopyDone { .. } => Some(Channel::CopyPaste),
            _ => None,
        }
    }
}

/// Peer role in the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The hypervisor channel bridge. At most one at a time.
    Host,
    /// A local desktop integration.
    Ui,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Drop-effect hint sent with drag feedback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DropEffect {
    None,
    Copy,
    Move,
    Link,
}

/// Socket protocol version checked in the handshake. Independent of the
/// negotiated RPC version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Minimal envelope for extracting `type` from frames that do not decode
/// as a [`Message`].
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
}
