//! Persistence of dive logs and discoveries.
//!
//! [`KeyValueStore`] is the durable backend boundary: whole-value reads and
//! writes under string keys. [`LogStore`] layers the two logical records on
//! top of it as JSON documents:
//!
//! - `DIVE_LOGS_MAX2`: at most [`MAX_STORED_LOGS`] dive logs, oldest first
//! - `DISCOVERED_PHOTO_ENTRIES`: every discovery, in discovery order

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::models::{Discovery, DiveLog};

pub const DIVE_LOGS_KEY: &str = "DIVE_LOGS_MAX2";
pub const DISCOVERY_KEY: &str = "DISCOVERED_PHOTO_ENTRIES";
pub const FIRST_LAUNCH_KEY: &str = "FIRST_LAUNCH_DONE";

pub const MAX_STORED_LOGS: usize = 2;

/// Whole-record key-value backend.
///
/// A `write` either fully replaces the value or leaves the previous one in
/// place. Removing an absent key succeeds.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per record under a root directory.
///
/// Writes go to a sibling temp file that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append `log` to `logs`, evicting from the front so that at most
/// [`MAX_STORED_LOGS`] remain.
pub fn retain_latest(mut logs: Vec<DiveLog>, log: DiveLog) -> Vec<DiveLog> {
    while logs.len() >= MAX_STORED_LOGS {
        logs.remove(0);
    }
    logs.push(log);
    logs
}

/// Dive log and discovery records over a [`KeyValueStore`].
///
/// Plain reads never fail: missing, unreadable or corrupt records are
/// treated as empty. Read-modify-write sequences on one record are serialized
/// per store and abort on a backend read failure.
pub struct LogStore<S> {
    backend: S,
    logs_lock: Mutex<()>,
    discoveries_lock: Mutex<()>,
}

impl<S: KeyValueStore> LogStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            logs_lock: Mutex::new(()),
            discoveries_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Load a record for read-modify-write.
    ///
    /// Backend failures propagate so the caller never writes over a record it
    /// could not read. A corrupt record is treated as empty and replaced.
    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StorageError> {
        let Some(raw) = self.backend.read(key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(err) => {
                warn!(key, %err, "Corrupt record, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.load_list(key).unwrap_or_else(|err| {
            warn!(key, %err, "Failed to read record, treating as empty");
            Vec::new()
        })
    }

    fn write_list<T: Serialize>(&self, key: &str, list: &[T]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(list)?;
        self.backend.write(key, &raw)
    }

    /// Store a completed log, evicting the oldest beyond capacity.
    ///
    /// Returns the number of logs retained.
    pub fn save_log(&self, log: DiveLog) -> Result<usize, StorageError> {
        let _guard = self.logs_lock.lock();
        let logs = retain_latest(self.load_list(DIVE_LOGS_KEY)?, log);
        self.write_list(DIVE_LOGS_KEY, &logs)?;
        info!(retained = logs.len(), "Saved dive log");
        Ok(logs.len())
    }

    pub fn get_logs(&self) -> Vec<DiveLog> {
        let logs: Vec<DiveLog> = self.read_list(DIVE_LOGS_KEY);
        debug!(count = logs.len(), "Loaded dive logs");
        logs
    }

    pub fn clear_logs(&self) -> Result<(), StorageError> {
        let _guard = self.logs_lock.lock();
        self.backend.remove(DIVE_LOGS_KEY)
    }

    pub fn get_discoveries(&self) -> Vec<Discovery> {
        self.read_list(DISCOVERY_KEY)
    }

    /// Append one discovery.
    pub fn save_discovery(&self, entry: Discovery) -> Result<(), StorageError> {
        self.modify_discoveries(|mut list| {
            list.push(entry);
            list
        })
    }

    /// Replace the whole discovery list.
    pub fn update_discoveries(&self, list: &[Discovery]) -> Result<(), StorageError> {
        let _guard = self.discoveries_lock.lock();
        self.write_list(DISCOVERY_KEY, list)?;
        debug!(count = list.len(), "Updated discoveries");
        Ok(())
    }

    /// Read the discovery list, transform it and write it back while holding
    /// the discovery lock, so concurrent callers cannot lose each other's
    /// updates.
    pub fn modify_discoveries<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(Vec<Discovery>) -> Vec<Discovery>,
    {
        let _guard = self.discoveries_lock.lock();
        let updated = f(self.load_list(DISCOVERY_KEY)?);
        self.write_list(DISCOVERY_KEY, &updated)?;
        debug!(count = updated.len(), "Updated discoveries");
        Ok(())
    }

    pub fn clear_discoveries(&self) -> Result<(), StorageError> {
        let _guard = self.discoveries_lock.lock();
        self.backend.remove(DISCOVERY_KEY)
    }

    /// Remove both records.
    pub fn reset(&self) -> Result<(), StorageError> {
        self.clear_discoveries()?;
        self.clear_logs()?;
        info!("Cleared discoveries and dive logs");
        Ok(())
    }

    /// Reset once per installation.
    ///
    /// Returns `true` if this call performed the reset.
    pub fn run_first_launch_reset(&self) -> Result<bool, StorageError> {
        if self.backend.read(FIRST_LAUNCH_KEY)?.is_some() {
            debug!("Not first launch, skipping reset");
            return Ok(false);
        }
        info!("First launch detected, resetting");
        self.reset()?;
        self.backend.write(FIRST_LAUNCH_KEY, "true")?;
        Ok(true)
    }

    /// Number of distinct species among stored discoveries.
    pub fn discovered_species_count(&self) -> usize {
        self.get_discoveries()
            .iter()
            .map(|d| d.scientific_name.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
