//! Core types shared across all skybot crates.
//!
//! Defines the daemon configuration, endpoint and connection status types,
//! and the error taxonomy used by the orchestrator, the control plane, and
//! the CLI.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod status;

pub use config::{
    ClientConfig, ControlConfig, DaemonConfig, EndpointConfig, LogConfig, RetryPolicy, SlotsConfig,
};
pub use endpoint::Endpoint;
pub use error::{SkybotError, SlotError};
pub use status::ConnectionStatus;
