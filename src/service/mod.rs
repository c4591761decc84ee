//! Guest service: hosts both engines behind a Unix domain socket.
//!
//! One peer attaches as the host (the hypervisor channel bridge) and
//! speaks the V3 RPCs; any number of local UI integrations attach to
//! drive the engines and receive notifications.
//!
//! Architecture: channel-based actor. A single service loop owns all
//! mutable state ([`state::ServiceState`]). Per-connection tasks forward
//! decoded frames over mpsc channels. Engine output (host RPCs, UI
//! notifications, watchdog fires) flows back into the loop through
//! unbounded channels and is routed to the right connections.

mod connection;
mod handler;
pub mod state;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use connection::{DisconnectNotice, ServiceCommand};
use state::{ConnectionId, ServiceState};

use crate::dnd::watchdog::{TokioWatchdog, UNGRAB_TIMEOUT, WatchdogToken};
use crate::ipc::protocol::Message;
use crate::notify::{Notifier, UiNotification};
use crate::staging::LocalStaging;

/// Service startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("service already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime configuration, filled from the command line.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub staging_root: PathBuf,
    pub ungrab_timeout: Duration,
    pub dnd_allowed: bool,
    pub cp_allowed: bool,
}

impl ServiceConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            staging_root: LocalStaging::default_root(),
            ungrab_timeout: UNGRAB_TIMEOUT,
            dnd_allowed: true,
            cp_allowed: true,
        }
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }
}

/// Resolve the default socket path, `$XDG_RUNTIME_DIR/dndcp/guest.sock`.
pub fn default_socket_path() -> Result<PathBuf, ServiceError> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").map_err(|_| ServiceError::NoRuntimeDir)?;
    Ok(PathBuf::from(runtime_dir).join("dndcp").join("guest.sock"))
}

/// Run the service until SIGTERM or SIGINT.
///
/// # Errors
///
/// Returns `ServiceError` if the socket cannot be bound or another
/// instance already owns it.
pub async fn run(config: ServiceConfig) -> Result<(), ServiceError> {
    let listener = bind_socket(&config.socket_path).await?;
    tracing::info!(path = %config.socket_path.display(), "service listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    };

    serve(listener, &config, shutdown).await;

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        tracing::warn!(error = %e, path = %config.socket_path.display(), "failed to remove socket");
    }
    tracing::info!("service stopped");
    Ok(())
}

/// The service loop. Returns once `shutdown` completes.
async fn serve(listener: UnixListener, config: &ServiceConfig, shutdown: impl Future<Output = ()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServiceCommand>();
    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel::<DisconnectNotice>();
    let (host_tx, mut host_rx) = mpsc::unbounded_channel::<Message>();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<UiNotification>();
    let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<WatchdogToken>();

    // Per-connection channels for unsolicited frames.
    let mut outbound: HashMap<ConnectionId, mpsc::UnboundedSender<Message>> = HashMap::new();

    let mut state = ServiceState::new(
        config,
        host_tx,
        Notifier::new(notify_tx),
        Box::new(TokioWatchdog::new(fire_tx)),
    );

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // -- New connection --
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        accept_connection(stream, &cmd_tx, &disconnect_tx, &mut outbound);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }

            // -- Frame from a connection task --
            Some(cmd) = cmd_rx.recv() => {
                let reply = handler::handle_message(&mut state, cmd.request, cmd.connection_id);
                let _ = cmd.response_tx.send(reply);
            }

            // -- Connection closed --
            Some(notice) = disconnect_rx.recv() => {
                let conn_id = notice.connection_id;
                outbound.remove(&conn_id);
                state.remove_connection(conn_id);
                tracing::debug!(?conn_id, "connection cleaned up");
            }

            // -- Engine output --
            Some(msg) = host_rx.recv() => route_to_host(&state, &outbound, msg),
            Some(notification) = notify_rx.recv() => broadcast(&state, &outbound, notification),
            Some(token) = fire_rx.recv() => state.dnd.on_watchdog_fired(token),

            () = &mut shutdown => break,
        }
    }
}

fn accept_connection(
    stream: UnixStream,
    cmd_tx: &mpsc::UnboundedSender<ServiceCommand>,
    disconnect_tx: &mpsc::UnboundedSender<DisconnectNotice>,
    outbound: &mut HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
) {
    let conn_id = ConnectionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    outbound.insert(conn_id, tx);

    connection::spawn_connection(stream, conn_id, cmd_tx.clone(), rx, disconnect_tx.clone());
    tracing::debug!(?conn_id, "accepted connection");
}

fn route_to_host(
    state: &ServiceState,
    outbound: &HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    msg: Message,
) {
    let Some(tx) = state.host().and_then(|id| outbound.get(&id)) else {
        tracing::debug!(frame = ?msg, "no host attached, frame dropped");
        return;
    };
    if tx.send(msg).is_err() {
        tracing::warn!("host send failed, host disconnecting");
    }
}

fn broadcast(
    state: &ServiceState,
    outbound: &HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    notification: UiNotification,
) {
    for conn_id in state.ui_connections() {
        if let Some(tx) = outbound.get(&conn_id) {
            let _ = tx.send(Message::Notify {
                notification: notification.clone(),
            });
        }
    }
}

// -- Socket setup --

/// Create the socket directory (mode 0700) and bind the listener.
///
/// On EADDRINUSE, probes the existing socket: a live peer means another
/// instance is running; otherwise the stale socket is removed.
async fn bind_socket(path: &Path) -> Result<UnixListener, ServiceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ServiceError::MkdirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| ServiceError::MkdirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                },
            )?;
        }
    }

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => match UnixStream::connect(path).await {
            Ok(_) => Err(ServiceError::AlreadyRunning(path.to_path_buf())),
            Err(_) => {
                tracing::info!(path = %path.display(), "removing stale socket");
                std::fs::remove_file(path).map_err(|e| ServiceError::BindFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                UnixListener::bind(path).map_err(|e| ServiceError::BindFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        },
        Err(e) => Err(ServiceError::BindFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::UnixStream;
    use tokio_util::codec::Framed;

    use crate::ipc::codec::MessageCodec;
    use crate::ipc::protocol::{PROTOCOL_VERSION, Role, Status};
    use crate::payload::{ClipboardFormat, ClipboardPayload};

    type Conn = Framed<UnixStream, MessageCodec>;

    /// Start a service on a temp socket. Runs until the test ends.
    async fn start_service(dir: &Path, ungrab_timeout: Duration) -> PathBuf {
        let sock = dir.join("guest.sock");
        let mut config = ServiceConfig::new(&sock).with_staging_root(dir.join("staging"));
        config.ungrab_timeout = ungrab_timeout;
        let listener = bind_socket(&sock).await.unwrap();
        tokio::spawn(async move {
            serve(listener, &config, std::future::pending()).await;
        });
        sock
    }

    async fn connect(path: &Path) -> Conn {
        let stream = UnixStream::connect(path).await.unwrap();
        Framed::new(stream, MessageCodec::new())
    }

    async fn recv(conn: &mut Conn) -> Message {
        tokio::time::timeout(Duration::from_secs(5), conn.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap()
    }

    async fn attach(path: &Path, role: Role) -> Conn {
        let mut conn = connect(path).await;
        conn.send(Message::Hello {
            version: PROTOCOL_VERSION,
            role,
        })
        .await
        .unwrap();
        assert_eq!(
            recv(&mut conn).await,
            Message::HelloAck {
                status: Status::Ok,
                error: None
            }
        );
        conn
    }

    /// Skip notifications until a response arrives.
    async fn response(conn: &mut Conn) -> Message {
        loop {
            match recv(conn).await {
                Message::Notify { .. } => continue,
                other => return other,
            }
        }
    }

    /// Give the service loop a moment to process fire-and-forget frames.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn text(s: &str) -> ClipboardPayload {
        ClipboardPayload::new().with(ClipboardFormat::Text, s)
    }

    #[tokio::test]
    async fn clipboard_push_and_delivery_flow() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;

        let mut host = attach(&sock, Role::Host).await;
        host.send(Message::Capabilities {
            dnd_version: 3,
            cp_version: 3,
        })
        .await
        .unwrap();
        settle().await;
        let mut ui = attach(&sock, Role::Ui).await;

        // UI pushes; host receives.
        ui.send(Message::UiPushClipboard {
            id: 1,
            payload: text("from guest"),
        })
        .await
        .unwrap();
        assert_eq!(
            response(&mut ui).await,
            Message::Response {
                id: 1,
                status: Status::Ok,
                error: None
            }
        );
        assert_eq!(
            recv(&mut host).await,
            Message::CpSendClip {
                session: 0,
                payload: text("from guest")
            }
        );

        // Host delivers; UI is notified.
        host.send(Message::CpClipDelivered {
            session: 2,
            payload: text("from host"),
        })
        .await
        .unwrap();
        assert_eq!(
            recv(&mut ui).await,
            Message::Notify {
                notification: UiNotification::NewClipboard {
                    payload: text("from host"),
                    staging_dir: None
                }
            }
        );
    }

    #[tokio::test]
    async fn watchdog_times_out_query() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), Duration::from_millis(20)).await;

        let mut host = attach(&sock, Role::Host).await;
        host.send(Message::Capabilities {
            dnd_version: 3,
            cp_version: 0,
        })
        .await
        .unwrap();
        host.send(Message::DndQueryExiting {
            session: 4,
            x: 10,
            y: 10,
        })
        .await
        .unwrap();

        assert_eq!(
            recv(&mut host).await,
            Message::DndUngrabTimeout { session: 4 }
        );
    }

    #[tokio::test]
    async fn second_host_rejected_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;
        let _host = attach(&sock, Role::Host).await;

        let mut second = connect(&sock).await;
        second
            .send(Message::Hello {
                version: PROTOCOL_VERSION,
                role: Role::Host,
            })
            .await
            .unwrap();
        assert_eq!(
            recv(&mut second).await,
            Message::HelloAck {
                status: Status::Error,
                error: Some("host_already_connected".into())
            }
        );
        assert!(second.next().await.is_none());
    }

    #[tokio::test]
    async fn version_mismatch_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;

        let mut conn = connect(&sock).await;
        conn.send(Message::Hello {
            version: 999,
            role: Role::Ui,
        })
        .await
        .unwrap();
        match recv(&mut conn).await {
            Message::HelloAck { status, error } => {
                assert_eq!(status, Status::Error);
                assert_eq!(error.as_deref(), Some("version_mismatch"));
            }
            other => panic!("expected HelloAck error, got {other:?}"),
        }
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn non_hello_first_message_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;

        let mut conn = connect(&sock).await;
        conn.send(Message::UiConfirmDragStart { id: 1 })
            .await
            .unwrap();
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn host_disconnect_resets_live_drag() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;

        let mut host = attach(&sock, Role::Host).await;
        host.send(Message::Capabilities {
            dnd_version: 3,
            cp_version: 3,
        })
        .await
        .unwrap();
        settle().await;
        let mut ui = attach(&sock, Role::Ui).await;

        host.send(Message::DndDragEnter {
            session: 1,
            payload: text("dragged"),
        })
        .await
        .unwrap();
        assert!(matches!(
            recv(&mut ui).await,
            Message::Notify {
                notification: UiNotification::DetectionWindow { show: true, .. }
            }
        ));

        drop(host);

        loop {
            if let Message::Notify {
                notification: UiNotification::Reset { .. },
            } = recv(&mut ui).await
            {
                break;
            }
        }

        // Engines are inert now.
        ui.send(Message::UiConfirmDragStart { id: 2 })
            .await
            .unwrap();
        assert_eq!(
            response(&mut ui).await,
            Message::Response {
                id: 2,
                status: Status::Error,
                error: Some("no_transport".into())
            }
        );
    }

    #[tokio::test]
    async fn unknown_type_returns_error_keeps_connection() {
        use bytes::BufMut;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;
        let conn = attach(&sock, Role::Ui).await;
        let (mut reader, mut writer) = conn.into_inner().into_split();

        async fn write_frame(writer: &mut tokio::net::unix::OwnedWriteHalf, payload: &[u8]) {
            let mut frame = bytes::BytesMut::new();
            frame.put_u32(payload.len() as u32);
            frame.extend_from_slice(payload);
            writer.write_all(&frame).await.unwrap();
        }

        async fn read_frame(reader: &mut tokio::net::unix::OwnedReadHalf) -> Message {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).await.unwrap();
            let mut buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
            reader.read_exact(&mut buf).await.unwrap();
            rmp_serde::from_slice(&buf).unwrap()
        }

        #[derive(serde::Serialize)]
        struct FakeMsg {
            #[serde(rename = "type")]
            msg_type: String,
        }
        let unknown = rmp_serde::to_vec_named(&FakeMsg {
            msg_type: "frobnicate".into(),
        })
        .unwrap();
        write_frame(&mut writer, &unknown).await;
        assert_eq!(
            read_frame(&mut reader).await,
            Message::Error {
                reason: "unknown_type".into()
            }
        );

        // Still open: a valid request gets its response.
        let valid = rmp_serde::to_vec_named(&Message::UiLocalClipboard {
            id: 7,
            payload: text("x"),
        })
        .unwrap();
        write_frame(&mut writer, &valid).await;
        assert_eq!(
            read_frame(&mut reader).await,
            Message::Response {
                id: 7,
                status: Status::Ok,
                error: None
            }
        );
    }

    #[tokio::test]
    async fn live_socket_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = start_service(dir.path(), UNGRAB_TIMEOUT).await;
        assert!(matches!(
            bind_socket(&sock).await,
            Err(ServiceError::AlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("guest.sock");
        drop(std::os::unix::net::UnixListener::bind(&sock).unwrap());
        assert!(sock.exists());
        bind_socket(&sock).await.unwrap();
    }
}
