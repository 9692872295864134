//! Key/value configuration store: the persistence seam under the settings cache.
//!
//! Every value is an opaque string with an audit pair (`updated_by`,
//! `updated_at`). Stores notify registered [`StoreObserver`]s after each
//! committed write so caches and audit sinks can never silently miss a change,
//! including writes that bypass the typed setters.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Weak;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

/// One persisted configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Receives a callback after every committed store write.
pub trait StoreObserver: Send + Sync {
    /// Called once per written entry, after the write is durable.
    fn on_write(&self, entry: &ConfigEntry);
}

/// Persistence contract for configuration key/value pairs.
pub trait ConfigStore: Send + Sync {
    /// All entries, in key order.
    fn get_all(&self) -> Result<Vec<ConfigEntry>>;

    /// Single entry, `None` if the key was never set.
    fn get(&self, key: &str) -> Result<Option<ConfigEntry>>;

    /// Insert or overwrite `key`. A `None` description keeps any existing one.
    fn upsert(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<ConfigEntry>;

    /// Overwrite an existing key; `None` when the key does not exist.
    fn update(&self, key: &str, value: &str, updated_by: &str) -> Result<Option<ConfigEntry>>;

    /// Upsert several keys atomically: either every pair lands or none does.
    fn upsert_many(&self, pairs: &[(&str, &str)], updated_by: &str) -> Result<Vec<ConfigEntry>>;

    /// Register a write observer. Dropped observers are pruned lazily.
    fn subscribe(&self, observer: Weak<dyn StoreObserver>);
}

/// Observer registry shared by the store implementations.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Weak<dyn StoreObserver>>>,
}

impl ObserverList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Weak<dyn StoreObserver>) {
        self.observers.write().push(observer);
    }

    /// Notify live observers; must be called with no store lock held.
    pub fn notify(&self, entries: &[ConfigEntry]) {
        let live: Vec<_> = {
            let mut guard = self.observers.write();
            guard.retain(|weak| weak.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            for entry in entries {
                observer.on_write(entry);
            }
        }
    }

    /// Number of observers still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
