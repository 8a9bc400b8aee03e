//! Durable slot assignment snapshot.
//!
//! The snapshot is a projection of the slot table: which slots are occupied,
//! and by which endpoint and owner. Counters, connection status, and logs are
//! runtime-only and start fresh after a restart.
//!
//! The file is rewritten whole (write tmp, then rename) after every mutation
//! and read once at startup. A missing or unreadable file yields an empty
//! table rather than an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use skybot_types::SlotError;

use crate::validator;

/// Saved assignment of one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDetail {
    /// `host:port`.
    pub endpoint: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// On-disk layout: `{ "usedSlots": [...], "slotDetails": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub used_slots: Vec<bool>,
    pub slot_details: Vec<Option<SlotDetail>>,
}

impl SlotSnapshot {
    /// All-empty table of `slot_count` slots.
    pub fn empty(slot_count: usize) -> Self {
        Self {
            used_slots: vec![false; slot_count],
            slot_details: vec![None; slot_count],
        }
    }

    /// Fit the snapshot to `slot_count` slots and drop inconsistent entries.
    ///
    /// An entry survives only if it is marked used, has a detail whose
    /// endpoint parses, and does not repeat an endpoint seen in an earlier
    /// slot. Everything else becomes an empty slot.
    pub fn normalized(self, slot_count: usize) -> Self {
        let mut out = Self::empty(slot_count);
        let mut seen: Vec<String> = Vec::new();

        for index in 0..slot_count {
            let used = self.used_slots.get(index).copied().unwrap_or(false);
            let detail = self.slot_details.get(index).cloned().flatten();
            let detail = match (used, detail) {
                (true, Some(detail)) => detail,
                (true, None) => {
                    warn!(slot = index, "snapshot marks slot used without details; clearing");
                    continue;
                }
                (false, Some(_)) => {
                    warn!(slot = index, "snapshot has details for unused slot; clearing");
                    continue;
                }
                (false, None) => continue,
            };

            let endpoint = match validator::parse_endpoint(&detail.endpoint) {
                Ok(ep) => ep.to_string(),
                Err(e) => {
                    warn!(slot = index, error = %e, "snapshot endpoint invalid; clearing");
                    continue;
                }
            };
            if seen.contains(&endpoint) {
                warn!(slot = index, endpoint = %endpoint, "snapshot endpoint duplicated; clearing");
                continue;
            }
            seen.push(endpoint.clone());

            out.used_slots[index] = true;
            out.slot_details[index] = Some(SlotDetail {
                endpoint,
                owner: detail.owner,
            });
        }

        let dropped = self.used_slots.iter().skip(slot_count).filter(|u| **u).count();
        if dropped > 0 {
            warn!(dropped, slot_count, "snapshot has occupied slots beyond slot count; dropping");
        }
        out
    }

    pub fn occupied_count(&self) -> usize {
        self.used_slots.iter().filter(|u| **u).count()
    }
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot for a table of `slot_count` slots.
    ///
    /// Never fails: a missing, unreadable, or malformed file gives an
    /// all-empty table.
    pub fn load(&self, slot_count: usize) -> SlotSnapshot {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no slot snapshot, starting empty");
                return SlotSnapshot::empty(slot_count);
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read slot snapshot, starting empty"
                );
                return SlotSnapshot::empty(slot_count);
            }
        };

        match serde_json::from_str::<SlotSnapshot>(&content) {
            Ok(snapshot) => snapshot.normalized(slot_count),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to parse slot snapshot, starting empty"
                );
                SlotSnapshot::empty(slot_count)
            }
        }
    }

    /// Write the whole snapshot atomically.
    pub fn save(&self, snapshot: &SlotSnapshot) -> Result<(), SlotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SlotError::Persistence(format!("failed to create state dir: {e}")))?;
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SlotError::Persistence(format!("failed to serialize snapshot: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| SlotError::Persistence(format!("failed to write snapshot tmp: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| SlotError::Persistence(format!("failed to rename snapshot: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(endpoint: &str, owner: Option<&str>) -> Option<SlotDetail> {
        Some(SlotDetail {
            endpoint: endpoint.into(),
            owner: owner.map(String::from),
        })
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("slots.json"));

        let mut snapshot = SlotSnapshot::empty(3);
        snapshot.used_slots[1] = true;
        snapshot.slot_details[1] = detail("play.example.com:25565", Some("alice"));
        store.save(&snapshot).unwrap();

        let loaded = store.load(3);
        assert_eq!(loaded, snapshot);
        assert!(!tmp.path().join("slots.json.tmp").exists());
    }

    #[test]
    fn file_uses_camel_case_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("slots.json"));
        store.save(&SlotSnapshot::empty(2)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["usedSlots"], serde_json::json!([false, false]));
        assert_eq!(raw["slotDetails"], serde_json::json!([null, null]));
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("absent.json"));
        assert_eq!(store.load(4), SlotSnapshot::empty(4));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("slots.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SnapshotStore::new(&path).load(2), SlotSnapshot::empty(2));
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = SnapshotStore::new(blocker.join("slots.json"));
        assert!(matches!(
            store.save(&SlotSnapshot::empty(1)),
            Err(SlotError::Persistence(_))
        ));
    }

    #[test]
    fn normalized_resizes_table() {
        let mut snapshot = SlotSnapshot::empty(2);
        snapshot.used_slots[1] = true;
        snapshot.slot_details[1] = detail("a.example.com:1", None);

        let grown = snapshot.clone().normalized(4);
        assert_eq!(grown.used_slots, vec![false, true, false, false]);

        let shrunk = snapshot.normalized(1);
        assert_eq!(shrunk, SlotSnapshot::empty(1));
    }

    #[test]
    fn normalized_clears_inconsistent_entries() {
        let snapshot = SlotSnapshot {
            used_slots: vec![true, false, true, true, true],
            slot_details: vec![
                None,
                detail("b.example.com:1", None),
                detail("not an endpoint", None),
                detail("C.Example.com:7", Some("carol")),
                detail("c.example.com:7", Some("dave")),
            ],
        };
        let fixed = snapshot.normalized(5);
        assert_eq!(fixed.used_slots, vec![false, false, false, true, false]);
        assert_eq!(fixed.slot_details[3], detail("c.example.com:7", Some("carol")));
        assert_eq!(fixed.occupied_count(), 1);
    }
}
