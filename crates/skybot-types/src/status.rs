//! Connection status of a slot, as shown to polling clients.

use serde::{Deserialize, Serialize};

/// Live connection state of a single slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No live connection (empty slot, or waiting for a reconnect).
    #[default]
    Offline,
    /// A connection attempt is in flight.
    Connecting,
    /// Logged in to the remote server.
    Online,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Offline => write!(f, "Offline"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Online => write!(f, "Online"),
        }
    }
}
