//! Control socket server.
//!
//! Serves NDJSON over a Unix domain socket from a background thread. Each
//! request line is parsed into a [`SlotCommand`] and handed to the daemon
//! loop together with a oneshot reply channel; the loop owns all slot state
//! and answers with a [`SlotResponse`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use skybot_control::{SlotCommand, SlotResponse};

/// Longest accepted request line.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Total bytes read from one client connection.
const MAX_CONNECTION_BYTES: u64 = 4 * 1024 * 1024;

const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// A command waiting for the daemon loop, with the channel for its answer.
pub type ControlRequest = (SlotCommand, oneshot::Sender<SlotResponse>);
pub type ControlTx = mpsc::Sender<ControlRequest>;
pub type ControlRx = mpsc::Receiver<ControlRequest>;

/// Start the control server on its own thread, driven by `rt_handle`.
///
/// The socket is bound before the thread starts, so a bad path fails here.
/// The server stops accepting within a second of `shutdown` being set and
/// removes the socket file before the returned thread exits.
pub fn spawn_control_server(
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    rt_handle: tokio::runtime::Handle,
) -> Result<(ControlRx, JoinHandle<()>), String> {
    let listener = {
        let _guard = rt_handle.enter();
        bind(&socket_path).map_err(|e| {
            format!(
                "failed to bind control socket {}: {e}",
                socket_path.display()
            )
        })?
    };
    info!(path = %socket_path.display(), "control socket listening");
    let (tx, rx) = mpsc::channel();

    let thread = std::thread::Builder::new()
        .name("skybot-control".into())
        .spawn(move || {
            rt_handle.block_on(serve(listener, &socket_path, tx, shutdown));
        })
        .map_err(|e| format!("failed to spawn control server thread: {e}"))?;

    Ok((rx, thread))
}

fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(socket_path)?;

    // Owner-only: anyone who can connect can launch and cancel slots.
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)) {
        warn!(
            path = %socket_path.display(),
            error = %e,
            "failed to restrict control socket permissions"
        );
    }
    Ok(listener)
}

async fn serve(
    listener: UnixListener,
    socket_path: &Path,
    cmd_tx: ControlTx,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, _))) => {
                let tx = cmd_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, tx).await {
                        debug!(error = %e, "control connection ended");
                    }
                });
            }
            Ok(Err(e)) => warn!(error = %e, "control socket accept error"),
            Err(_) => {}
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("control socket stopped");
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &SlotResponse,
) -> Result<(), String> {
    let mut json = serde_json::to_string(response).map_err(|e| e.to_string())?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    writer.flush().await.map_err(|e| e.to_string())
}

async fn handle_connection(stream: UnixStream, cmd_tx: ControlTx) -> Result<(), String> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader.take(MAX_CONNECTION_BYTES)).lines();

    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        if line.len() > MAX_LINE_LENGTH {
            write_response(&mut writer, &SlotResponse::error("command too large")).await?;
            return Err("oversized command".into());
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command: SlotCommand = match serde_json::from_str(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                write_response(&mut writer, &SlotResponse::error(format!("invalid command: {e}")))
                    .await?;
                continue;
            }
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        if cmd_tx.send((command, resp_tx)).is_err() {
            write_response(&mut writer, &SlotResponse::error("daemon loop is not running")).await?;
            break;
        }
        let response = resp_rx
            .await
            .unwrap_or_else(|_| SlotResponse::error("daemon dropped the request"));
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}
