//! Orchestrator: owns the slot table and coordinates every slot operation.
//!
//! All mutation of slots goes through here, on the daemon's single loop
//! thread. Requests (`launch`, `edit`, `cancel`, `send_command`) validate
//! first, then write the snapshot, and only then change memory and start or
//! stop connections. A failed snapshot write therefore leaves everything as
//! it was. Connection events and reconnect timers drive the retry state
//! machine and never surface as errors to callers.

use std::sync::mpsc;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, error, info, warn};

use skybot_control::SlotSummary;
use skybot_types::{ConnectionStatus, DaemonConfig, Endpoint, RetryPolicy, SlotError};

use crate::attempt::{AttemptState, ConnectionEvent, Effect};
use crate::client::{ConnectRequest, EventSink, GameClient, SlotEvent};
use crate::log_buffer::LogEntry;
use crate::slot::{PendingReconnect, Slot};
use crate::store::{SlotSnapshot, SnapshotStore};
use crate::validator::{self, EndpointValidator};

/// The slot table and everything needed to act on it.
pub struct Orchestrator {
    slots: Vec<Slot>,
    retry: RetryPolicy,
    identity_prefix: String,
    enforce_ownership: bool,
    validator: EndpointValidator,
    store: SnapshotStore,
    client: Box<dyn GameClient>,
    events_tx: mpsc::Sender<SlotEvent>,
}

impl Orchestrator {
    /// Build the slot table, restoring assignments from `store`.
    ///
    /// Restored slots are occupied but not connected; call [`start_all`]
    /// to connect them.
    ///
    /// [`start_all`]: Orchestrator::start_all
    pub fn new(
        config: &DaemonConfig,
        store: SnapshotStore,
        client: Box<dyn GameClient>,
        events_tx: mpsc::Sender<SlotEvent>,
    ) -> Self {
        let validator = EndpointValidator::new(&config.endpoints.blacklist);
        let mut slots: Vec<Slot> = (0..config.slots.count)
            .map(|i| Slot::new(i, config.logs.capacity))
            .collect();

        let snapshot = store.load(config.slots.count);
        let mut dropped = false;
        let mut seen_owners: Vec<String> = Vec::new();
        for (index, detail) in snapshot.slot_details.iter().enumerate() {
            let Some(detail) = detail else { continue };
            let endpoint = match validator.validate(&detail.endpoint) {
                Ok(ep) => ep,
                Err(e) => {
                    warn!(slot = index, error = %e, "not restoring slot");
                    dropped = true;
                    continue;
                }
            };
            let mut owner = detail.owner.clone();
            if let Some(name) = owner.as_deref().filter(|_| config.enforce_ownership) {
                if seen_owners.iter().any(|o| o == name) {
                    warn!(
                        slot = index,
                        owner = name,
                        "owner already holds a slot; restoring unowned"
                    );
                    owner = None;
                    dropped = true;
                } else {
                    seen_owners.push(name.to_string());
                }
            }
            let slot = &mut slots[index];
            slot.log(format!("restored assignment to {endpoint}"));
            slot.endpoint = Some(endpoint);
            slot.owner = owner;
        }

        let orchestrator = Self {
            slots,
            retry: config.retry.clone(),
            identity_prefix: config.identity_prefix.clone(),
            enforce_ownership: config.enforce_ownership,
            validator,
            store,
            client,
            events_tx,
        };

        if dropped {
            if let Err(e) = orchestrator.store.save(&orchestrator.snapshot()) {
                error!(error = %e, "failed to rewrite slot snapshot after restore");
            }
        }
        info!(
            slots = orchestrator.slots.len(),
            occupied = orchestrator.occupied_count(),
            "slot table ready"
        );
        orchestrator
    }

    /// Connect every occupied slot that has no live connection.
    pub fn start_all(&mut self) {
        let now = Instant::now();
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if slot.is_occupied() && slot.connection.is_none() && slot.pending_reconnect.is_none() {
                self.connect_slot(index, now);
            }
        }
    }

    /// Disconnect every slot without releasing it.
    ///
    /// Assignments stay in the snapshot, so the next start reconnects them.
    pub fn stop_all(&mut self) {
        for slot in &mut self.slots {
            if slot.connection.is_some() || slot.pending_reconnect.is_some() {
                slot.teardown();
                slot.pending_reconnect = None;
                slot.state.status = ConnectionStatus::Offline;
                slot.generation += 1;
                slot.log("stopped for shutdown");
            }
        }
    }

    /// Occupy an empty slot with `raw_endpoint` and connect it.
    pub fn launch(
        &mut self,
        index: usize,
        raw_endpoint: &str,
        owner: &str,
    ) -> Result<(), SlotError> {
        let slot = self.slot(index)?;
        if slot.is_occupied() {
            return Err(SlotError::SlotOccupied(index));
        }
        if self.enforce_ownership {
            if let Some(held) = self.slot_owned_by(owner) {
                return Err(SlotError::OwnerBusy {
                    owner: owner.to_string(),
                    slot: held,
                });
            }
        }
        let endpoint = self.validator.validate(raw_endpoint)?;
        self.check_duplicate(&endpoint, None)?;

        let owner = (!owner.is_empty()).then(|| owner.to_string());
        let mut snapshot = self.snapshot();
        snapshot.used_slots[index] = true;
        snapshot.slot_details[index] = Some(crate::store::SlotDetail {
            endpoint: endpoint.to_string(),
            owner: owner.clone(),
        });
        self.persist(&snapshot)?;

        let slot = &mut self.slots[index];
        slot.log(format!(
            "launched for {endpoint} by {}",
            owner.as_deref().unwrap_or("anonymous")
        ));
        slot.endpoint = Some(endpoint);
        slot.owner = owner;
        slot.state = AttemptState::default();
        slot.pending_reconnect = None;
        self.connect_slot(index, Instant::now());
        Ok(())
    }

    /// Replace the endpoint of an occupied slot and reconnect from scratch.
    pub fn edit(&mut self, index: usize, raw_endpoint: &str, owner: &str) -> Result<(), SlotError> {
        self.check_owner(index, owner)?;
        let endpoint = self.validator.validate(raw_endpoint)?;
        self.check_duplicate(&endpoint, Some(index))?;

        let mut snapshot = self.snapshot();
        if let Some(detail) = snapshot.slot_details[index].as_mut() {
            detail.endpoint = endpoint.to_string();
        }
        self.persist(&snapshot)?;

        let slot = &mut self.slots[index];
        slot.teardown();
        let previous = slot
            .endpoint
            .replace(endpoint.clone())
            .map(|ep| ep.to_string())
            .unwrap_or_default();
        slot.state = AttemptState::default();
        slot.pending_reconnect = None;
        slot.log(format!("endpoint changed from {previous} to {endpoint}"));
        self.connect_slot(index, Instant::now());
        Ok(())
    }

    /// Disconnect and release a slot.
    pub fn cancel(&mut self, index: usize, owner: &str) -> Result<(), SlotError> {
        self.check_owner(index, owner)?;

        let mut snapshot = self.snapshot();
        snapshot.used_slots[index] = false;
        snapshot.slot_details[index] = None;
        self.persist(&snapshot)?;

        let slot = &mut self.slots[index];
        slot.release();
        slot.log("cancelled; slot released");
        Ok(())
    }

    /// Read-only view of every slot.
    pub fn status(&self) -> Vec<SlotSummary> {
        self.slots.iter().map(Slot::summary).collect()
    }

    /// Buffered log entries of one slot, oldest first.
    pub fn logs(&self, index: usize) -> Result<Vec<LogEntry>, SlotError> {
        Ok(self.slot(index)?.logs.entries().cloned().collect())
    }

    /// Best-effort: forward `text` to an online slot.
    ///
    /// Returns `Ok(false)` when the line could not be delivered; the reason
    /// is written to the slot log. Only an unknown slot index is an error.
    pub fn send_command(&mut self, index: usize, text: &str) -> Result<bool, SlotError> {
        let slot = self.slot_mut(index)?;
        let status = slot.state.status;
        let Some(conn) = slot
            .connection
            .as_mut()
            .filter(|_| status == ConnectionStatus::Online)
        else {
            slot.log(format!("command dropped (slot is {status}): {text}"));
            return Ok(false);
        };
        match conn.send_text(text) {
            Ok(()) => {
                slot.log(format!("> {text}"));
                Ok(true)
            }
            Err(e) => {
                slot.log(format!("command failed: {e}"));
                Ok(false)
            }
        }
    }

    /// Apply a connection event received now.
    pub fn handle_event(&mut self, event: SlotEvent) {
        self.handle_event_at(event, Instant::now());
    }

    /// Apply a connection event at `now`.
    ///
    /// Events from an older connection generation, or from a connection that
    /// has already ended, are dropped.
    pub fn handle_event_at(&mut self, event: SlotEvent, now: Instant) {
        let Some(slot) = self.slots.get(event.slot) else {
            warn!(slot = event.slot, "event for unknown slot");
            return;
        };
        if event.generation != slot.generation {
            debug!(
                slot = event.slot,
                generation = event.generation,
                current = slot.generation,
                event = ?event.event,
                "ignoring event from stale connection"
            );
            return;
        }
        if slot.pending_reconnect.is_some() {
            debug!(slot = event.slot, event = ?event.event, "ignoring event after connection end");
            return;
        }
        self.apply_event(event.slot, &event.event, now);
    }

    /// Fire due reconnect timers.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let Some(pending) = slot.pending_reconnect else {
                continue;
            };
            if pending.due > now {
                continue;
            }
            slot.pending_reconnect = None;
            if !slot.is_occupied() || pending.generation != slot.generation {
                debug!(slot = index, generation = pending.generation, "dropping stale reconnect");
                continue;
            }
            self.connect_slot(index, now);
        }
    }

    /// Persisted projection of the current table.
    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            used_slots: self.slots.iter().map(Slot::is_occupied).collect(),
            slot_details: self.slots.iter().map(Slot::detail).collect(),
        }
    }

    /// Channel on which connection events for this table are expected.
    pub fn event_sender(&self) -> mpsc::Sender<SlotEvent> {
        self.events_tx.clone()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn online_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.status == ConnectionStatus::Online)
            .count()
    }

    fn slot(&self, index: usize) -> Result<&Slot, SlotError> {
        let count = self.slots.len();
        self.slots
            .get(index)
            .ok_or(SlotError::SlotOutOfRange { index, count })
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot, SlotError> {
        let count = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(SlotError::SlotOutOfRange { index, count })
    }

    fn slot_owned_by(&self, owner: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| s.is_occupied() && s.owner.as_deref() == Some(owner))
            .map(|s| s.index)
    }

    /// Slot must exist, be occupied, and belong to `owner` (or to nobody).
    fn check_owner(&self, index: usize, owner: &str) -> Result<(), SlotError> {
        let slot = self.slot(index)?;
        if !slot.is_occupied() {
            return Err(SlotError::SlotEmpty(index));
        }
        if self.enforce_ownership {
            if let Some(recorded) = slot.owner.as_deref() {
                if recorded != owner {
                    return Err(SlotError::NotOwner(index));
                }
            }
        }
        Ok(())
    }

    fn check_duplicate(
        &self,
        endpoint: &Endpoint,
        excluding: Option<usize>,
    ) -> Result<(), SlotError> {
        let occupied = self
            .slots
            .iter()
            .filter_map(|s| s.endpoint.as_ref().map(|ep| (s.index, ep)));
        match validator::find_duplicate(occupied, endpoint, excluding) {
            Some(slot) => Err(SlotError::DuplicateEndpoint {
                endpoint: endpoint.to_string(),
                slot,
            }),
            None => Ok(()),
        }
    }

    fn persist(&self, snapshot: &SlotSnapshot) -> Result<(), SlotError> {
        self.store.save(snapshot).map_err(|e| {
            error!(path = %self.store.path().display(), error = %e, "slot snapshot write failed");
            e
        })
    }

    /// Open a new connection for an occupied slot under a fresh generation.
    fn connect_slot(&mut self, index: usize, now: Instant) {
        let slot = &mut self.slots[index];
        let Some(endpoint) = slot.endpoint.clone() else {
            return;
        };

        slot.generation += 1;
        slot.pending_reconnect = None;
        slot.state = AttemptState::connecting(slot.state.counters);
        let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
        let identity = format!("{}_{}_{}", self.identity_prefix, index, suffix);
        slot.identity = Some(identity.clone());
        slot.log(format!("connecting to {endpoint} as {identity}"));

        let generation = slot.generation;
        let request = ConnectRequest {
            slot: index,
            generation,
            endpoint,
            identity,
        };
        let sink = EventSink::new(index, generation, self.events_tx.clone());
        match self.client.connect(request, sink) {
            Ok(handle) => slot.connection = Some(handle),
            Err(e) => {
                slot.log(e.to_string());
                self.apply_event(index, &ConnectionEvent::End, now);
            }
        }
    }

    fn apply_event(&mut self, index: usize, event: &ConnectionEvent, now: Instant) {
        let slot = &mut self.slots[index];
        if !slot.is_occupied() {
            return;
        }

        let (next, effects) = slot.state.on_event(event, &self.retry);
        slot.state = next;
        if *event == ConnectionEvent::End {
            slot.connection = None;
        }

        let mut gave_up = None;
        for effect in effects {
            match effect {
                Effect::Log(text) => slot.log(text),
                Effect::ScheduleReconnect { delay } => {
                    let Some(due) = now.checked_add(delay) else {
                        warn!(
                            slot = index,
                            ?delay,
                            "reconnect delay out of range; not rescheduling"
                        );
                        slot.log("reconnect delay out of range");
                        continue;
                    };
                    slot.pending_reconnect = Some(PendingReconnect {
                        due,
                        generation: slot.generation,
                    });
                }
                Effect::GiveUp { failures } => gave_up = Some(failures),
            }
        }

        if let Some(failures) = gave_up {
            self.give_up(index, failures);
        }
    }

    /// Release a slot that exhausted its failure budget.
    fn give_up(&mut self, index: usize, failures: u32) {
        let reason = SlotError::GiveUp {
            slot: index,
            failures,
        };
        let slot = &mut self.slots[index];
        warn!(slot = index, failures, "releasing slot after repeated failures");
        slot.release();
        slot.log(reason.to_string());

        if let Err(e) = self.store.save(&self.snapshot()) {
            error!(slot = index, error = %e, "failed to persist slot release");
            self.slots[index].log(format!("release not persisted: {e}"));
        }
    }
}
