//! Per-connection task: framed I/O, handshake, request forwarding.
//!
//! Each socket connection spawns a tokio task that:
//! 1. Wraps the socket in the length-prefixed MessagePack codec.
//! 2. Reads the first frame (must be `hello`) and forwards it to the
//!    service loop for validation.
//! 3. Loops: forwards decoded frames to the service loop and writes any
//!    reply; writes unsolicited frames (host RPCs, UI notifications)
//!    pushed by the loop.
//! 4. On exit, notifies the service loop for cleanup.

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Status};

use super::state::ConnectionId;

/// Frame forwarded from a connection task to the service loop.
#[derive(Debug)]
pub struct ServiceCommand {
    pub request: Message,
    pub response_tx: oneshot::Sender<Option<Message>>,
    pub connection_id: ConnectionId,
}

/// Sent when a connection closes.
#[derive(Debug)]
pub struct DisconnectNotice {
    pub connection_id: ConnectionId,
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("service loop closed")]
    ServiceGone,
    #[error("response channel closed")]
    ResponseDropped,
}

/// Spawn a connection task.
///
/// Runs until the peer disconnects, a protocol error occurs, or the
/// service loop drops `outbound_rx`'s sender.
pub fn spawn_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<ServiceCommand>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    disconnect_tx: mpsc::UnboundedSender<DisconnectNotice>,
) {
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, conn_id, cmd_tx, outbound_rx).await {
            tracing::debug!(?conn_id, error = %e, "connection closed");
        }
        let _ = disconnect_tx.send(DisconnectNotice {
            connection_id: conn_id,
        });
    });
}

async fn handle_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<ServiceCommand>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // -- Handshake --
    let first_frame = framed
        .next()
        .await
        .ok_or(ConnectionError::HandshakeEof)??;

    let hello = match decode_frame(&first_frame) {
        DecodeResult::Ok(msg @ Message::Hello { .. }) => msg,
        DecodeResult::Ok(_) | DecodeResult::UnknownType(_) => {
            return Err(ConnectionError::NotHello);
        }
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    let ack = send_command(&cmd_tx, hello, conn_id)
        .await?
        .ok_or(ConnectionError::ResponseDropped)?;
    let rejected = matches!(
        ack,
        Message::HelloAck {
            status: Status::Error,
            ..
        }
    );
    framed.send(ack).await?;
    if rejected {
        return Ok(());
    }

    // -- Main loop --
    loop {
        tokio::select! {
            frame = framed.next() => {
                let raw = match frame {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => return Err(ConnectionError::Codec(e)),
                    None => return Ok(()),
                };
                match decode_frame(&raw) {
                    DecodeResult::Ok(msg) => {
                        if let Some(reply) = send_command(&cmd_tx, msg, conn_id).await? {
                            framed.send(reply).await?;
                        }
                    }
                    DecodeResult::UnknownType(envelope) => {
                        tracing::debug!(?conn_id, msg_type = %envelope.msg_type, "unknown message type");
                        framed
                            .send(Message::Error {
                                reason: "unknown_type".into(),
                            })
                            .await?;
                    }
                    DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => framed.send(msg).await?,
                    // Service loop is shutting down.
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Forward a frame to the service loop and wait for its verdict.
async fn send_command(
    cmd_tx: &mpsc::UnboundedSender<ServiceCommand>,
    request: Message,
    conn_id: ConnectionId,
) -> Result<Option<Message>, ConnectionError> {
    let (response_tx, response_rx) = oneshot::channel();
    cmd_tx
        .send(ServiceCommand {
            request,
            response_tx,
            connection_id: conn_id,
        })
        .map_err(|_| ConnectionError::ServiceGone)?;
    response_rx
        .await
        .map_err(|_| ConnectionError::ResponseDropped)
}
