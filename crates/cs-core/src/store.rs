use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Slot names
// ---------------------------------------------------------------------------

/// Slot holding the [`crate::types::SessionRecord`].
pub const SESSION_SLOT: &str = "session";
/// Slot holding the [`crate::types::UserRecord`].
pub const USER_SLOT: &str = "user";
/// Slot holding the [`crate::types::CachedPublicKey`].
pub const PUBLIC_KEY_SLOT: &str = "public-key";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// File-system-backed persistence for the client's fixed state slots.
///
/// Each slot is one JSON file under a configurable directory (defaults to
/// `~/.config/coding-space/state/`). Slots are replaced as one unit: the new
/// record is written to a sibling temp file and renamed over the slot, so a
/// reader sees either the old record or the new one, never a torn write.
pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    /// Create a store with the default directory (`~/.config/coding-space/state/`).
    pub fn default_path() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("coding-space")
            .join("state");
        Self { base_dir: base }
    }

    /// Create a store backed by a custom directory (useful for testing).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", slot))
    }

    /// Replace the slot's contents with `value` as one unit.
    pub fn write_slot<T: Serialize>(&self, slot: &str, value: &T) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.slot_path(slot);
        let tmp = self.base_dir.join(format!("{}.json.tmp", slot));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Best-effort read of a slot.
    ///
    /// A missing slot reads as `None`. An unreadable or malformed slot also
    /// reads as `None` — logged for diagnostics, never surfaced to the
    /// caller, so stored-state corruption fails open to "no state".
    pub fn read_slot<T: DeserializeOwned>(&self, slot: &str) -> Option<T> {
        let path = self.slot_path(slot);
        if !path.exists() {
            return None;
        }
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(slot, error = %e, "state slot unreadable, treating as absent");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(slot, error = %e, "state slot malformed, treating as absent");
                None
            }
        }
    }

    /// Delete a slot. Returns `true` if the file was removed.
    pub fn delete_slot(&self, slot: &str) -> Result<bool, StoreError> {
        let path = self.slot_path(slot);
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionRecord, UserRecord};
    use chrono::Duration;

    fn temp_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = StateStore::new(dir.path().to_path_buf());
        (store, dir)
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (store, _dir) = temp_store();
        let record = SessionRecord::issued("tok123".into(), "bearer".into(), Duration::days(7));

        store.write_slot(SESSION_SLOT, &record).unwrap();
        let loaded: SessionRecord = store.read_slot(SESSION_SLOT).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn missing_slot_reads_as_none() {
        let (store, _dir) = temp_store();
        assert!(store.read_slot::<UserRecord>(USER_SLOT).is_none());
    }

    #[test]
    fn malformed_slot_reads_as_none() {
        let (store, dir) = temp_store();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("session.json"), "{not json at all").unwrap();
        assert!(store.read_slot::<SessionRecord>(SESSION_SLOT).is_none());
    }

    #[test]
    fn wrong_shape_reads_as_none() {
        let (store, _dir) = temp_store();
        store.write_slot(USER_SLOT, &serde_json::json!({"unexpected": true})).unwrap();
        assert!(store.read_slot::<UserRecord>(USER_SLOT).is_none());
    }

    #[test]
    fn overwrite_replaces_whole_record() {
        let (store, _dir) = temp_store();
        let first = UserRecord::new("alice");
        let second = UserRecord::new("bob");

        store.write_slot(USER_SLOT, &first).unwrap();
        store.write_slot(USER_SLOT, &second).unwrap();

        let loaded: UserRecord = store.read_slot(USER_SLOT).unwrap();
        assert_eq!(loaded.username, "bob");
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let (store, dir) = temp_store();
        store.write_slot(USER_SLOT, &UserRecord::new("alice")).unwrap();
        assert!(!dir.path().join("user.json.tmp").exists());
        assert!(dir.path().join("user.json").exists());
    }

    #[test]
    fn delete_slot_is_idempotent() {
        let (store, _dir) = temp_store();
        store.write_slot(USER_SLOT, &UserRecord::new("alice")).unwrap();

        assert!(store.delete_slot(USER_SLOT).unwrap());
        assert!(!store.delete_slot(USER_SLOT).unwrap()); // already gone
        assert!(store.read_slot::<UserRecord>(USER_SLOT).is_none());
    }
}
