//! RPC version 3 delegate.
//!
//! Maps between the engine-level [`HostEvent`] / [`GuestMessage`] enums
//! and V3 wire frames. The host stamps every inbound frame with a session
//! id; outbound frames echo the most recent one.

use std::path::PathBuf;

use crate::ipc::protocol::Message;
use crate::notify::Channel;

use super::{GuestMessage, HostEvent, HostSender};

#[derive(Debug)]
pub struct RpcV3 {
    channel: Channel,
    outbound: HostSender,
    session: u32,
}

impl RpcV3 {
    pub fn new(channel: Channel, outbound: HostSender) -> Self {
        Self {
            channel,
            outbound,
            session: 0,
        }
    }

    /// Encode and queue `msg` for the host. Returns `false` if the message
    /// does not belong to this delegate's channel or the host side is gone.
    pub fn send(&mut self, msg: GuestMessage) -> bool {
        let Some(frame) = self.encode(msg) else {
            return false;
        };
        tracing::trace!(channel = ?self.channel, ?frame, "rpc v3 send");
        self.outbound.send(frame).is_ok()
    }

    fn encode(&self, msg: GuestMessage) -> Option<Message> {
        let session = self.session;
        let frame = match (self.channel, msg) {
            (Channel::Dnd, GuestMessage::DragEnterDone { x, y }) => {
                Message::DndDragEnterDone { session, x, y }
            }
            (Channel::Dnd, GuestMessage::DragStartDone) => Message::DndDragStartDone { session },
            (Channel::Dnd, GuestMessage::DropDone { staging_dir }) => Message::DndDropDone {
                session,
                staging_dir: staging_dir.to_string_lossy().into_owned(),
            },
            (Channel::Dnd, GuestMessage::Feedback(effect)) => {
                Message::DndFeedback { session, effect }
            }
            (Channel::Dnd, GuestMessage::UngrabTimeout) => Message::DndUngrabTimeout { session },
            (Channel::Dnd, GuestMessage::GhDragEnter(payload)) => {
                Message::DndGhDragEnter { session, payload }
            }
            (Channel::CopyPaste, GuestMessage::SendClipboard(payload)) => {
                Message::CpSendClip { session, payload }
            }
            (Channel::CopyPaste, GuestMessage::RequestClipboard) => {
                Message::CpRequestRemoteClip { session }
            }
            (Channel::CopyPaste, GuestMessage::RequestFiles { staging_dir }) => {
                Message::CpRequestFiles {
                    session,
                    staging_dir: staging_dir.to_string_lossy().into_owned(),
                }
            }
            (channel, msg) => {
                tracing::warn!(?channel, ?msg, "message not valid on this channel");
                return None;
            }
        };
        Some(frame)
    }

    /// Decode an inbound frame for this delegate's channel.
    pub fn decode(&mut self, msg: Message) -> Option<HostEvent> {
        let (session, event) = match (self.channel, msg) {
            (Channel::Dnd, Message::DndDragEnter { session, payload }) => {
                (session, HostEvent::DragEnter(payload))
            }
            (Channel::Dnd, Message::DndDragStart { session, staging_dir }) => (
                session,
                HostEvent::DragStart {
                    staging_hint: staging_dir.map(PathBuf::from),
                },
            ),
            (Channel::Dnd, Message::DndCancel { session }) => (session, HostEvent::Cancel),
            (Channel::Dnd, Message::DndDrop { session }) => (session, HostEvent::Drop),
            (
                Channel::Dnd,
                Message::DndFileCopyDone {
                    session,
                    success,
                    staging_dir,
                },
            ) => (
                session,
                HostEvent::FileCopyDone {
                    success,
                    staging_dir: staging_dir.map(PathBuf::from),
                },
            ),
            (Channel::Dnd, Message::DndQueryExiting { session, x, y }) => {
                (session, HostEvent::QueryExiting { x, y })
            }
            (
                Channel::Dnd,
                Message::DndUpdateUnityDetWnd {
                    session,
                    show,
                    window_id,
                },
            ) => (session, HostEvent::UpdateUnityDetWnd { show, window_id }),
            (Channel::Dnd, Message::DndUngrabTimeoutAck { session }) => {
                (session, HostEvent::UngrabTimeoutAck)
            }
            (Channel::Dnd, Message::DndGhCancel { session }) => (session, HostEvent::GhCancel),
            (Channel::Dnd, Message::DndPrivDragEnter { session, x, y }) => {
                (session, HostEvent::PrivDragEnter { x, y })
            }
            (Channel::Dnd, Message::DndPrivDragLeave { session, x, y }) => {
                (session, HostEvent::PrivDragLeave { x, y })
            }
            (Channel::Dnd, Message::DndPrivDrop { session, x, y }) => {
                (session, HostEvent::PrivDrop { x, y })
            }
            (Channel::CopyPaste, Message::CpRequestClip { session }) => {
                (session, HostEvent::ClipboardRequest)
            }
            (Channel::CopyPaste, Message::CpClipDelivered { session, payload }) => {
                (session, HostEvent::ClipboardDelivered(payload))
            }
            (
                Channel::CopyPaste,
                Message::CpFileCopyDone {
                    session,
                    success,
                    staging_dir,
                },
            ) => (
                session,
                HostEvent::CpFileCopyDone {
                    success,
                    staging_dir: staging_dir.map(PathBuf::from),
                },
            ),
            (channel, other) => {
                tracing::debug!(?channel, frame = ?other, "frame not handled by rpc v3");
                return None;
            }
        };
        self.session = session;
        Some(event)
    }
}
