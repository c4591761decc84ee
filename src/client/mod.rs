//! One-shot CLI client for the guest service.

mod service_client;

use std::path::Path;

use service_client::ServiceClient;

use crate::payload::ClipboardFormat;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("service: {0}")]
    Service(String),
}

/// Connect as a UI peer and report the handshake result.
///
/// With `watch`, keep the connection open and print every notification
/// until the service goes away.
pub async fn status(socket_path: &Path, watch: bool) -> Result<(), ClientError> {
    let mut client = ServiceClient::connect(socket_path).await?;
    println!("connected: {}", socket_path.display());

    if watch {
        while let Some(notification) = client.next_notification().await? {
            println!("{}", describe(&notification));
        }
        println!("service closed the connection");
    }
    Ok(())
}

fn describe(notification: &crate::notify::UiNotification) -> String {
    use crate::notify::UiNotification::*;

    match notification {
        NewClipboard {
            payload,
            staging_dir,
        } => {
            let mut line =
                format!("new_clipboard formats={:?}", payload.formats().collect::<Vec<_>>());
            if let Some(text) = payload.get(ClipboardFormat::Text) {
                line.push_str(&format!(" text={:?}", String::from_utf8_lossy(text)));
            }
            with_staging(line, staging_dir.as_deref())
        }
        DragStarted {
            payload,
            staging_dir,
        } => with_staging(
            format!("drag_started formats={:?}", payload.formats().collect::<Vec<_>>()),
            staging_dir.as_deref(),
        ),
        ClipboardSourceRequested => "clipboard_source_requested".into(),
        FileCopyDone { channel, success } => {
            format!("file_copy_done channel={channel:?} success={success}")
        }
        SourceDropped => "source_dropped".into(),
        SourceCancelled => "source_cancelled".into(),
        DetectionWindow { show, x, y } => format!("detection_window show={show} x={x} y={y}"),
        UnityDetectionWindow { show, window_id } => {
            format!("unity_detection_window show={show} window_id={window_id}")
        }
        PrivateDrop { x, y } => format!("private_drop x={x} y={y}"),
        Reset { channel } => format!("reset channel={channel:?}"),
    }
}

fn with_staging(line: String, staging_dir: Option<&Path>) -> String {
    match staging_dir {
        Some(dir) => format!("{line} staging_dir={}", dir.display()),
        None => line,
    }
}
