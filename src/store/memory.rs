//! In-process configuration store used for tests, dry runs, and the `memory` backend.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Weak;

use chrono::Utc;
use parking_lot::Mutex;

use crate::core::errors::Result;
use crate::store::{ConfigEntry, ConfigStore, ObserverList, StoreObserver};

/// `BTreeMap`-backed store guarded by a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, ConfigEntry>>,
    observers: ObserverList,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn write_entry(
    map: &mut BTreeMap<String, ConfigEntry>,
    key: &str,
    value: &str,
    description: Option<&str>,
    updated_by: &str,
) -> ConfigEntry {
    let previous_description = map.get(key).and_then(|e| e.description.clone());
    let entry = ConfigEntry {
        key: key.to_string(),
        value: value.to_string(),
        description: description.map(str::to_string).or(previous_description),
        updated_by: Some(updated_by.to_string()),
        updated_at: Utc::now(),
    };
    map.insert(key.to_string(), entry.clone());
    entry
}

impl ConfigStore for MemoryStore {
    fn get_all(&self) -> Result<Vec<ConfigEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<ConfigEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn upsert(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<ConfigEntry> {
        let entry = {
            let mut map = self.entries.lock();
            write_entry(&mut map, key, value, description, updated_by)
        };
        self.observers.notify(std::slice::from_ref(&entry));
        Ok(entry)
    }

    fn update(&self, key: &str, value: &str, updated_by: &str) -> Result<Option<ConfigEntry>> {
        let entry = {
            let mut map = self.entries.lock();
            if !map.contains_key(key) {
                return Ok(None);
            }
            write_entry(&mut map, key, value, None, updated_by)
        };
        self.observers.notify(std::slice::from_ref(&entry));
        Ok(Some(entry))
    }

    fn upsert_many(&self, pairs: &[(&str, &str)], updated_by: &str) -> Result<Vec<ConfigEntry>> {
        let written: Vec<ConfigEntry> = {
            let mut map = self.entries.lock();
            pairs
                .iter()
                .map(|(key, value)| write_entry(&mut map, key, value, None, updated_by))
                .collect()
        };
        self.observers.notify(&written);
        Ok(written)
    }

    fn subscribe(&self, observer: Weak<dyn StoreObserver>) {
        self.observers.add(observer);
    }
}
