//! Durable key/value storage for recovery progress
//!
//! Values are JSON documents stored one file per key under the data
//! directory. Persistence is best-effort: failures are logged and never
//! propagate into the state machine.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Key under which the orchestrator persists its `RecoveryState`
pub const RECOVERY_STATE_KEY: &str = "recovery-state";
/// Key under which the last known good resume point is kept
pub const LAST_PLAYBACK_KEY: &str = "last-playback";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Read and decode a JSON value. Corrupt records are dropped.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Discarding unreadable {} record: {}", key, e);
            store.remove(key);
            None
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => store.set(key, &json),
        Err(e) => tracing::error!("Failed to serialize {}: {}", key, e),
    }
}

/// One `<key>.json` file per key
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path(key);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::error!("Failed to create data directory: {}", e);
            return;
        }
        // Write-then-rename so a crash never leaves a torn record behind
        let path = self.path(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        if let Err(e) = std::fs::write(&tmp, value).and_then(|_| std::fs::rename(&tmp, &path)) {
            tracing::error!("Failed to persist {}: {}", path.display(), e);
        }
    }

    fn remove(&self, key: &str) {
        let path = self.path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Process-local store, used by tests and when no data directory is wanted
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
