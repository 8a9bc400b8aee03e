//! Control-plane protocol for the skybot daemon.
//!
//! Commands map one-to-one onto the orchestrator's public operations
//! (launch, edit, cancel, status, logs, send). Transport is newline-delimited
//! JSON over a Unix domain socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skybot_types::ConnectionStatus;

/// A command sent to the daemon control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotCommand {
    /// Health check. Returns uptime and slot counts.
    Ping,
    /// Status of every slot.
    Status,
    /// Buffered log lines of one slot.
    Logs { slot: usize },
    /// Occupy an empty slot and connect it.
    Launch {
        slot: usize,
        endpoint: String,
        owner: String,
    },
    /// Point an occupied slot at a new endpoint and reconnect.
    Edit {
        slot: usize,
        endpoint: String,
        owner: String,
    },
    /// Disconnect and release a slot.
    Cancel { slot: usize, owner: String },
    /// Forward one line of text to an online slot.
    Send { slot: usize, text: String },
    /// Request graceful daemon shutdown.
    Shutdown,
}

/// Response to a control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Short human-readable outcome.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SlotResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

/// One row of the `status` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub slot: usize,
    pub status: ConnectionStatus,
    /// `host:port`, absent for empty slots.
    pub endpoint: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Identity used by the current connection, if any.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub total_failures: u32,
}

/// A buffered log line as returned by `logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Response payload for `ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonPing {
    pub uptime_secs: u64,
    pub slot_count: usize,
    pub occupied_count: usize,
    pub online_count: usize,
    pub daemon_pid: u32,
}

/// Client for connecting to the daemon control socket.
pub struct DaemonClient {
    socket_path: std::path::PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: std::path::PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a command and wait for the response (blocking).
    pub fn send(&self, command: &SlotCommand) -> Result<SlotResponse, String> {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::os::unix::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            format!(
                "failed to connect to daemon at {}: {e}",
                self.socket_path.display()
            )
        })?;
        let mut writer = stream
            .try_clone()
            .map_err(|e| format!("failed to clone stream: {e}"))?;

        let mut json =
            serde_json::to_string(command).map_err(|e| format!("failed to encode command: {e}"))?;
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| format!("failed to send command: {e}"))?;

        let mut line = String::new();
        BufReader::new(stream)
            .take(1_000_000)
            .read_line(&mut line)
            .map_err(|e| format!("failed to read response: {e}"))?;

        serde_json::from_str(&line).map_err(|e| format!("failed to parse response: {e}"))
    }

    /// Whether a daemon answers on the socket.
    pub fn is_running(&self) -> bool {
        self.send(&SlotCommand::Ping).is_ok()
    }
}
