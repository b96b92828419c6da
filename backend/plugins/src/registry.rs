//! Plugin registry — authoritative, crash-consistent storage of plugin
//! records with a point-in-time snapshot mechanism for rollback.
//!
//! An insertion-ordered in-memory index fronts the SQLite store. Every
//! mutation is persisted before it becomes visible to readers, so a record a
//! reader observes is always a record that survived a durable write. Critical
//! sections are short; no lock is held across plugin-supplied code.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::{info, warn};

use persona_core::{PluginError, PluginRecord, PluginStatus};

use crate::store::RegistryStore;

/// Opaque capture of one record, taken before a mutating operation begins
/// and replayed by `restore` on rollback.
pub struct SnapshotToken {
    record: PluginRecord,
}

impl SnapshotToken {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The captured record, for protocol steps that need the pre-operation
    /// version or state blob without restoring yet.
    pub fn record(&self) -> &PluginRecord {
        &self.record
    }
}

#[derive(Default)]
struct Index {
    records: HashMap<String, PluginRecord>,
    order: Vec<String>,
}

pub struct PluginRegistry {
    index: RwLock<Index>,
    store: Mutex<RegistryStore>,
}

impl PluginRegistry {
    /// Open the durable registry at `path`, reloading persisted records.
    ///
    /// Records found in a transitional status (`installing`, `reloading`,
    /// `rollingback`) are demoted to `failed`: the operation that wrote them
    /// cannot have committed, and execution handles do not survive a restart.
    pub fn open(path: &str) -> Result<Self, PluginError> {
        Self::from_store(RegistryStore::open(path).map_err(storage_err)?)
    }

    /// In-memory registry (for testing).
    pub fn in_memory() -> Result<Self, PluginError> {
        Self::from_store(RegistryStore::in_memory().map_err(storage_err)?)
    }

    fn from_store(store: RegistryStore) -> Result<Self, PluginError> {
        let mut index = Index::default();
        for mut record in store.load_all().map_err(storage_err)? {
            if record.status.is_transitional() {
                warn!(
                    plugin = %record.name,
                    status = %record.status,
                    "Record was mid-operation at shutdown; demoting to failed"
                );
                record.status = PluginStatus::Failed;
                store.upsert(&record).map_err(storage_err)?;
            }
            index.order.push(record.name.clone());
            index.records.insert(record.name.clone(), record);
        }
        if !index.order.is_empty() {
            info!(count = index.order.len(), "Plugin registry loaded");
        }
        Ok(Self {
            index: RwLock::new(index),
            store: Mutex::new(store),
        })
    }

    /// Fetch a record by name.
    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        let index = self.index.read().expect("registry lock poisoned");
        index.records.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let index = self.index.read().expect("registry lock poisoned");
        index.records.contains_key(name)
    }

    /// Upsert a record. The durable write happens before the in-memory index
    /// is touched, so readers never observe a record that could be lost.
    pub fn put(&self, record: PluginRecord) -> Result<(), PluginError> {
        {
            let store = self.store.lock().expect("store lock poisoned");
            store.upsert(&record).map_err(storage_err)?;
        }
        let mut index = self.index.write().expect("registry lock poisoned");
        if !index.records.contains_key(&record.name) {
            index.order.push(record.name.clone());
        }
        index.records.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a record entirely (uninstall).
    pub fn remove(&self, name: &str) -> Result<(), PluginError> {
        {
            let store = self.store.lock().expect("store lock poisoned");
            store.delete(name).map_err(storage_err)?;
        }
        let mut index = self.index.write().expect("registry lock poisoned");
        index.records.remove(name);
        index.order.retain(|n| n != name);
        Ok(())
    }

    /// Capture the full record before a mutating operation begins.
    pub fn snapshot(&self, name: &str) -> Result<SnapshotToken, PluginError> {
        self.get(name)
            .map(|record| SnapshotToken { record })
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Revert the record to the captured snapshot.
    pub fn restore(&self, token: SnapshotToken) -> Result<(), PluginError> {
        self.put(token.record)
    }

    /// All records in stable insertion order.
    pub fn list(&self) -> Vec<PluginRecord> {
        let index = self.index.read().expect("registry lock poisoned");
        index
            .order
            .iter()
            .filter_map(|name| index.records.get(name).cloned())
            .collect()
    }
}

fn storage_err(e: anyhow::Error) -> PluginError {
    PluginError::Storage(e.to_string())
}
