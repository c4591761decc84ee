//! Transport selection: version-keyed RPC delegates.
//!
//! Each engine owns a [`TransportSlot`]. The slot holds the delegate for
//! the negotiated RPC version, or nothing when the version is not one we
//! implement. Inbound host frames are decoded by the delegate, so an
//! absent delegate means inbound events are dropped at the boundary and
//! outbound sends fail with [`EngineError::NoTransport`].

pub mod v3;

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::engine::EngineError;
use crate::ipc::protocol::{DropEffect, Message};
use crate::notify::Channel;
use crate::payload::ClipboardPayload;

use v3::RpcV3;

/// The one RPC version implemented.
pub const RPC_V3: u32 = 3;

/// "No version negotiated yet" / "host gone".
pub const RPC_NONE: u32 = 0;

/// Older versions the host may still offer. Recognised for logging only.
const LEGACY_VERSIONS: [u32; 3] = [1, 2, 4];

/// Sender for frames bound to the host connection.
pub type HostSender = mpsc::UnboundedSender<Message>;

/// Events decoded from the host channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    // -- DnD, host is the drag source (HG) --
    DragEnter(ClipboardPayload),
    DragStart { staging_hint: Option<PathBuf> },
    Cancel,
    Drop,
    FileCopyDone {
        success: bool,
        staging_dir: Option<PathBuf>,
    },
    // -- DnD, host is the drag target (GH) --
    QueryExiting { x: i32, y: i32 },
    UpdateUnityDetWnd { show: bool, window_id: u32 },
    UngrabTimeoutAck,
    GhCancel,
    PrivDragEnter { x: i32, y: i32 },
    PrivDragLeave { x: i32, y: i32 },
    PrivDrop { x: i32, y: i32 },
    // -- CopyPaste --
    ClipboardRequest,
    ClipboardDelivered(ClipboardPayload),
    CpFileCopyDone {
        success: bool,
        staging_dir: Option<PathBuf>,
    },
}

/// Version-independent messages the engines send to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestMessage {
    DragEnterDone { x: i32, y: i32 },
    DragStartDone,
    DropDone { staging_dir: PathBuf },
    Feedback(DropEffect),
    UngrabTimeout,
    GhDragEnter(ClipboardPayload),
    SendClipboard(ClipboardPayload),
    RequestClipboard,
    RequestFiles { staging_dir: PathBuf },
}

/// The delegate for one supported RPC version.
#[derive(Debug)]
pub enum Delegate {
    V3(RpcV3),
}

impl Delegate {
    /// Construct the delegate for `version`, or `None` if unsupported.
    pub fn for_version(version: u32, channel: Channel, outbound: HostSender) -> Option<Self> {
        match version {
            RPC_V3 => Some(Delegate::V3(RpcV3::new(channel, outbound))),
            RPC_NONE => None,
            v if LEGACY_VERSIONS.contains(&v) => {
                tracing::warn!(?channel, version = v, "legacy rpc version not implemented");
                None
            }
            v => {
                tracing::warn!(?channel, version = v, "unknown rpc version");
                None
            }
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Delegate::V3(_) => RPC_V3,
        }
    }

    fn send(&mut self, msg: GuestMessage) -> bool {
        match self {
            Delegate::V3(rpc) => rpc.send(msg),
        }
    }

    fn decode(&mut self, msg: Message) -> Option<HostEvent> {
        match self {
            Delegate::V3(rpc) => rpc.decode(msg),
        }
    }
}

/// An engine's exclusively-owned transport handle.
#[derive(Debug)]
pub struct TransportSlot {
    channel: Channel,
    outbound: HostSender,
    version: u32,
    delegate: Option<Delegate>,
    /// Number of delegates constructed over the slot's lifetime.
    generation: u64,
}

impl TransportSlot {
    pub fn new(channel: Channel, outbound: HostSender) -> Self {
        Self {
            channel,
            outbound,
            version: RPC_NONE,
            delegate: None,
            generation: 0,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_connected(&self) -> bool {
        self.delegate.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Destroy the current delegate, whatever it was doing.
    pub fn teardown(&mut self) {
        if let Some(old) = self.delegate.take() {
            tracing::debug!(channel = ?self.channel, version = old.version(), "transport torn down");
        }
    }

    /// Record `version` and try to build its delegate.
    ///
    /// Returns whether a delegate is now installed.
    pub fn install(&mut self, version: u32) -> bool {
        self.version = version;
        self.delegate = Delegate::for_version(version, self.channel, self.outbound.clone());
        if self.delegate.is_some() {
            self.generation += 1;
            tracing::info!(channel = ?self.channel, version, "transport installed");
        }
        self.delegate.is_some()
    }

    /// Send a message to the host through the current delegate.
    pub fn send(&mut self, msg: GuestMessage) -> Result<(), EngineError> {
        let delegate = self.delegate.as_mut().ok_or(EngineError::NoTransport)?;
        if delegate.send(msg) {
            Ok(())
        } else {
            Err(EngineError::NoTransport)
        }
    }

    /// Decode an inbound frame. Without a delegate nothing is subscribed.
    pub fn decode(&mut self, msg: Message) -> Option<HostEvent> {
        match self.delegate.as_mut() {
            Some(delegate) => delegate.decode(msg),
            None => {
                tracing::debug!(channel = ?self.channel, "inbound frame dropped, no transport");
                None
            }
        }
    }
}
