//! Persistence for the single parking record.
//!
//! The record lives in a small key-value store under two well-known keys:
//! the encoded coordinate fix and the resolved address string. Values are
//! overwritten in place and there is no schema versioning. A `KeyValueStore`
//! is injected rather than shared globally, so tests run against
//! `MemoryKeyValueStore` and the CLI against `FileKeyValueStore`.
//!
//! Reading never fails: a missing, unreadable, or undecodable value is
//! treated as absent.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::location::{Coordinate, CoordinateFix};

/// Key holding the encoded `CoordinateFix`
pub const LOCATION_KEY: &str = "savedLocation";
/// Key holding the resolved address
pub const ADDRESS_KEY: &str = "savedAddress";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to encode coordinate: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// A stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    Data(Vec<u8>),
    String(String),
}

/// A minimal durable key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredValue>;
    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn data(&self, key: &str) -> Option<Vec<u8>> {
        match self.get(key)? {
            StoredValue::Data(bytes) => Some(bytes),
            StoredValue::String(_) => None,
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            StoredValue::String(value) => Some(value),
            StoredValue::Data(_) => None,
        }
    }
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// YAML file holding all keys, rewritten whole on every change
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Reads the whole file. Anything unreadable is an empty store.
    fn read_entries(&self) -> BTreeMap<String, StoredValue> {
        if !self.path.exists() {
            return BTreeMap::new();
        }

        let yaml = match fs::read_to_string(&self.path) {
            Ok(yaml) => yaml,
            Err(e) => {
                warn!("Failed to read store at {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        match serde_yaml::from_str::<Option<BTreeMap<String, StoredValue>>>(&yaml) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unparsable store at {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, StoredValue>) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let yaml = serde_yaml::to_string(entries)?;

        // Write beside the target and rename so readers never see a partial file
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        fs::write(&tmp_path, yaml).map_err(io_error)?;
        fs::rename(&tmp_path, &self.path).map_err(io_error)?;

        Ok(())
    }

    fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, StoredValue>),
    {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut entries = self.read_entries();
        change(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        let _guard = self.lock.lock().ok()?;
        self.read_entries().remove(key)
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// The user's last marked parking spot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingRecord {
    pub fix: CoordinateFix,
    /// Resolved from `fix`; absent until resolution succeeds
    pub address: Option<String>,
}

impl ParkingRecord {
    pub fn new(fix: CoordinateFix) -> Self {
        Self { fix, address: None }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        self.fix.coordinate
    }

    /// Text to show for this spot: the address, or the coordinate when the
    /// address is unknown or blank
    pub fn label(&self) -> String {
        match self.address.as_deref() {
            Some(address) if !address.trim().is_empty() => address.to_string(),
            _ => self.fix.coordinate.to_string(),
        }
    }
}

/// Persistence contract for the parking record
pub trait LocationStore: Send + Sync {
    /// Replace whatever was stored with `record`
    fn save(&self, record: &ParkingRecord) -> Result<(), StoreError>;

    /// Store a new coordinate. Any previously stored address is dropped.
    fn save_fix(&self, fix: &CoordinateFix) -> Result<(), StoreError>;

    /// Attach an address to the stored coordinate
    fn save_address(&self, address: &str) -> Result<(), StoreError>;

    /// The stored record, or `None` when nothing usable is stored
    fn load(&self) -> Option<ParkingRecord>;
}

/// `LocationStore` over any `KeyValueStore`
pub struct ParkingStore<K> {
    kv: K,
}

impl<K: KeyValueStore> ParkingStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    fn load_fix(&self) -> Option<CoordinateFix> {
        let bytes = self.kv.data(LOCATION_KEY)?;
        match serde_json::from_slice::<CoordinateFix>(&bytes) {
            Ok(fix) => Some(fix),
            Err(e) => {
                warn!("Discarding undecodable saved location: {e}");
                None
            }
        }
    }
}

impl<K: KeyValueStore> LocationStore for ParkingStore<K> {
    fn save(&self, record: &ParkingRecord) -> Result<(), StoreError> {
        self.save_fix(&record.fix)?;
        if let Some(address) = &record.address {
            self.save_address(address)?;
        }
        Ok(())
    }

    fn save_fix(&self, fix: &CoordinateFix) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(fix)?;
        self.kv.set(LOCATION_KEY, StoredValue::Data(encoded))?;
        self.kv.remove(ADDRESS_KEY)?;
        info!("Saved parking location {}", fix.coordinate);
        Ok(())
    }

    fn save_address(&self, address: &str) -> Result<(), StoreError> {
        self.kv
            .set(ADDRESS_KEY, StoredValue::String(address.to_string()))?;
        info!("Saved parking address '{address}'");
        Ok(())
    }

    fn load(&self) -> Option<ParkingRecord> {
        let fix = self.load_fix()?;
        let address = self.kv.string(ADDRESS_KEY);
        debug!("Loaded parking record at {}", fix.coordinate);
        Some(ParkingRecord { fix, address })
    }
}
