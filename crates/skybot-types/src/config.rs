//! Configuration types for the skybot daemon.
//!
//! The daemon keeps a fixed pool of slots, each holding one persistent
//! connection to a remote game server. These types define the daemon's
//! configuration file (`daemon.toml`) and the default on-disk locations.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SkybotError;

/// Top-level daemon configuration, loaded from `~/.skybot/daemon.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Prefix of generated bot identities (`<prefix>_<slot>_<digits>`).
    #[serde(default = "default_identity_prefix")]
    pub identity_prefix: String,
    /// Whether slots are bound to the identity that launched them.
    #[serde(default = "default_true")]
    pub enforce_ownership: bool,
    /// Event-loop tick in milliseconds. Bounds reconnect timer resolution.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Snapshot file path. Defaults to `~/.skybot/slots.json`.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub logs: LogConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            identity_prefix: default_identity_prefix(),
            enforce_ownership: true,
            tick_ms: default_tick_ms(),
            state_path: None,
            slots: SlotsConfig::default(),
            retry: RetryPolicy::default(),
            logs: LogConfig::default(),
            endpoints: EndpointConfig::default(),
            client: ClientConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

/// Size of the slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotsConfig {
    #[serde(default = "default_slot_count")]
    pub count: usize,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            count: default_slot_count(),
        }
    }
}

/// Two-tier retry budget applied after every disconnect.
///
/// A slot retries in bursts of `cycle` attempts; every disconnect also counts
/// against `give_up_threshold`, after which the slot is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before a reconnect, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Attempts per burst before the attempt counter wraps to zero.
    #[serde(default = "default_retry_cycle")]
    pub cycle: u32,
    /// Total failures after which the slot is released.
    #[serde(default = "default_give_up_threshold")]
    pub give_up_threshold: u32,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            cycle: default_retry_cycle(),
            give_up_threshold: default_give_up_threshold(),
        }
    }
}

/// Per-slot log buffer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

/// Endpoint admission settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Hosts rejected in addition to the built-in loopback aliases.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Settings for the outbound game connection client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Control plane (Unix socket) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_identity_prefix() -> String {
    "SKYBOT".to_string()
}

fn default_tick_ms() -> u64 {
    100
}

fn default_slot_count() -> usize {
    5
}

/// Longest reconnect delay accepted: one day.
pub const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_cycle() -> u32 {
    5
}

fn default_give_up_threshold() -> u32 {
    10
}

fn default_log_capacity() -> usize {
    100
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_socket_path() -> PathBuf {
    skybot_dir().join("daemon.sock")
}

/// Default skybot directory (`~/.skybot`).
pub fn skybot_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".skybot")
}

/// Default daemon config file path.
pub fn daemon_config_path() -> PathBuf {
    skybot_dir().join("daemon.toml")
}

/// Default daemon PID file path.
pub fn daemon_pid_path() -> PathBuf {
    skybot_dir().join("daemon.pid")
}

/// Default slot snapshot path.
pub fn default_state_path() -> PathBuf {
    skybot_dir().join("slots.json")
}

impl DaemonConfig {
    /// Parse a daemon configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, SkybotError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SkybotError::Config(format!("invalid daemon config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, SkybotError> {
        toml::to_string_pretty(self)
            .map_err(|e| SkybotError::Config(format!("failed to serialize config: {e}")))
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), SkybotError> {
        if self.slots.count == 0 {
            return Err(SkybotError::Config("slots.count must be at least 1".into()));
        }
        if self.retry.cycle == 0 {
            return Err(SkybotError::Config("retry.cycle must be at least 1".into()));
        }
        if self.retry.give_up_threshold == 0 {
            return Err(SkybotError::Config(
                "retry.give_up_threshold must be at least 1".into(),
            ));
        }
        if self.retry.delay_ms > MAX_RETRY_DELAY_MS {
            return Err(SkybotError::Config(format!(
                "retry.delay_ms must be at most {MAX_RETRY_DELAY_MS}"
            )));
        }
        if self.logs.capacity == 0 {
            return Err(SkybotError::Config("logs.capacity must be at least 1".into()));
        }
        if self.tick_ms == 0 {
            return Err(SkybotError::Config("tick_ms must be at least 1".into()));
        }
        if self.identity_prefix.is_empty()
            || !self
                .identity_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SkybotError::Config(format!(
                "identity_prefix {:?} must be non-empty and use only letters, digits or '_'",
                self.identity_prefix
            )));
        }
        Ok(())
    }

    /// Snapshot path, falling back to the default location.
    pub fn state_path(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(default_state_path)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
