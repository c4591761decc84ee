//! Client side of the guest service socket.
//!
//! Connects as `Role::Ui` and performs the handshake. Used by the
//! `status` command, which can then follow the notification stream.

use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::MessageCodec;
use crate::ipc::protocol::{Message, PROTOCOL_VERSION, Role, Status};
use crate::notify::UiNotification;

use super::ClientError;

pub struct ServiceClient {
    framed: Framed<UnixStream, MessageCodec>,
}

impl ServiceClient {
    /// Connect to the service at `socket_path` and perform the handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| ClientError::Service(format!("connect failed: {e}")))?;
        let mut framed = Framed::new(stream, MessageCodec::new());

        framed
            .send(Message::Hello {
                version: PROTOCOL_VERSION,
                role: Role::Ui,
            })
            .await
            .map_err(|e| ClientError::Service(format!("send hello: {e}")))?;

        match framed.next().await {
            Some(Ok(Message::HelloAck {
                status: Status::Ok, ..
            })) => Ok(Self { framed }),
            Some(Ok(Message::HelloAck {
                status: Status::Error,
                error,
            })) => Err(ClientError::Service(format!(
                "handshake rejected: {}",
                error.unwrap_or_default()
            ))),
            other => Err(ClientError::Service(format!(
                "unexpected handshake response: {other:?}"
            ))),
        }
    }

    /// Wait for the next UI notification. `None` once the service closes
    /// the connection.
    pub async fn next_notification(&mut self) -> Result<Option<UiNotification>, ClientError> {
        loop {
            match self.framed.next().await {
                Some(Ok(Message::Notify { notification })) => return Ok(Some(notification)),
                Some(Ok(other)) => tracing::debug!(frame = ?other, "non-notification frame skipped"),
                Some(Err(e)) => return Err(ClientError::Service(format!("read: {e}"))),
                None => return Ok(None),
            }
        }
    }
}
