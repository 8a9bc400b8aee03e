//! Error types shared across all skybot crates.

/// Errors returned by slot operations.
///
/// Validation variants are reported synchronously to the caller and never
/// leave partial state behind. `ConnectionFailed` and `GiveUp` are produced
/// inside the retry machinery and only surface through slot logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("invalid endpoint {0:?}: expected <host>:<port>")]
    InvalidFormat(String),

    #[error("host {0:?} is not allowed")]
    BlacklistedHost(String),

    #[error("endpoint {endpoint} is already used by slot {slot}")]
    DuplicateEndpoint { endpoint: String, slot: usize },

    #[error("slot {0} is already occupied")]
    SlotOccupied(usize),

    #[error("slot {0} is empty")]
    SlotEmpty(usize),

    #[error("slot {index} does not exist (slot count is {count})")]
    SlotOutOfRange { index: usize, count: usize },

    #[error("slot {0} belongs to another owner")]
    NotOwner(usize),

    #[error("owner {owner:?} already holds slot {slot}")]
    OwnerBusy { owner: String, slot: usize },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("slot {slot} gave up after {failures} failures")]
    GiveUp { slot: usize, failures: u32 },

    #[error("failed to persist slot state: {0}")]
    Persistence(String),
}

/// Daemon-level errors: configuration and process management.
#[derive(Debug, thiserror::Error)]
pub enum SkybotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("daemon error: {0}")]
    Daemon(String),
}
