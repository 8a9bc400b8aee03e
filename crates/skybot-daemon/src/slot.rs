//! Slot: runtime state for a single connection slot.
//!
//! Each slot in the table tracks its assignment (endpoint and owner), the
//! retry state machine, the live connection handle, a pending reconnect
//! timer, and its recent log history. Only the assignment is persisted.

use std::time::Instant;

use tracing::info;

use skybot_control::SlotSummary;
use skybot_types::Endpoint;

use crate::attempt::AttemptState;
use crate::client::ConnectionHandle;
use crate::log_buffer::LogBuffer;
use crate::store::SlotDetail;

/// A reconnect waiting for its delay to elapse.
///
/// Fires only if the slot's generation still equals `generation`, so a
/// timer scheduled before an edit or cancel does nothing afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub due: Instant,
    pub generation: u64,
}

/// Runtime state for one slot.
pub struct Slot {
    pub index: usize,
    /// Set iff the slot is occupied.
    pub endpoint: Option<Endpoint>,
    pub owner: Option<String>,
    pub state: AttemptState,
    /// Bumped on every connection start and every release or reassignment.
    pub generation: u64,
    /// Identity of the current or most recent connection.
    pub identity: Option<String>,
    pub connection: Option<Box<dyn ConnectionHandle>>,
    pub pending_reconnect: Option<PendingReconnect>,
    pub logs: LogBuffer,
}

impl Slot {
    pub fn new(index: usize, log_capacity: usize) -> Self {
        Self {
            index,
            endpoint: None,
            owner: None,
            state: AttemptState::default(),
            generation: 0,
            identity: None,
            connection: None,
            pending_reconnect: None,
            logs: LogBuffer::new(log_capacity),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Append to the slot log and mirror it to tracing.
    pub fn log(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(slot = self.index, "{text}");
        self.logs.push(text);
    }

    /// Disconnect the live connection, if any.
    pub fn teardown(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.disconnect();
        }
    }

    /// Drop the connection and all assignment state, leaving an empty slot.
    ///
    /// The generation is bumped so events and timers from the old
    /// connection are ignored. Logs are kept.
    pub fn release(&mut self) {
        self.teardown();
        self.endpoint = None;
        self.owner = None;
        self.identity = None;
        self.state = AttemptState::default();
        self.pending_reconnect = None;
        self.generation += 1;
    }

    /// Persisted projection of this slot.
    pub fn detail(&self) -> Option<SlotDetail> {
        self.endpoint.as_ref().map(|ep| SlotDetail {
            endpoint: ep.to_string(),
            owner: self.owner.clone(),
        })
    }

    pub fn summary(&self) -> SlotSummary {
        SlotSummary {
            slot: self.index,
            status: self.state.status,
            endpoint: self.endpoint.as_ref().map(|ep| ep.to_string()),
            owner: self.owner.clone(),
            identity: self.identity.clone(),
            attempt: self.state.counters.attempt,
            total_failures: self.state.counters.total_failures,
        }
    }
}
