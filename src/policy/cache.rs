//! Process-wide mirror of the configuration store.
//!
//! The first read after construction or invalidation performs one bulk load
//! (`get_all`) and serves every later read from memory. The cache subscribes to
//! its store, so any committed write (through this cache or a side channel)
//! clears it. Writes go to the store first; a failed write leaves the cache
//! exactly as it was.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::core::errors::Result;
use crate::store::{ConfigEntry, ConfigStore, StoreObserver};

/// Lazily populated key/value cache over a [`ConfigStore`].
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    entries: RwLock<Option<HashMap<String, ConfigEntry>>>,
    loads: AtomicU64,
}

impl ConfigCache {
    /// Build a cache and register it as a write observer on `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>) -> Arc<Self> {
        let cache = Arc::new(Self {
            store: Arc::clone(&store),
            entries: RwLock::new(None),
            loads: AtomicU64::new(0),
        });
        let observer: Weak<dyn StoreObserver> = Arc::downgrade(&cache) as Weak<dyn StoreObserver>;
        store.subscribe(observer);
        cache
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Cached entry for `key`; `None` when the key was never set.
    pub fn get(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.with_entries(|map| map.get(key).cloned())
    }

    /// Cached value for `key`.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|map| map.get(key).map(|e| e.value.clone()))
    }

    /// Cached value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// Every cached entry, sorted by key.
    pub fn snapshot(&self) -> Result<Vec<ConfigEntry>> {
        let mut all = self.with_entries(|map| map.values().cloned().collect::<Vec<_>>())?;
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    /// Drop every cached entry; the next read reloads from the store.
    pub fn invalidate(&self) {
        *self.entries.write() = None;
    }

    /// Whether the cache currently holds a snapshot.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.entries.read().is_some()
    }

    /// Number of bulk loads performed so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Persist one key, then invalidate.
    pub fn write(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<ConfigEntry> {
        let entry = self.store.upsert(key, value, description, updated_by)?;
        self.invalidate();
        Ok(entry)
    }

    /// Persist several keys atomically, then invalidate.
    pub fn write_many(&self, pairs: &[(&str, &str)], updated_by: &str) -> Result<Vec<ConfigEntry>> {
        let entries = self.store.upsert_many(pairs, updated_by)?;
        self.invalidate();
        Ok(entries)
    }

    /// Overwrite an existing key; `None` when it was never set.
    pub fn update_existing(
        &self,
        key: &str,
        value: &str,
        updated_by: &str,
    ) -> Result<Option<ConfigEntry>> {
        let entry = self.store.update(key, value, updated_by)?;
        if entry.is_some() {
            self.invalidate();
        }
        Ok(entry)
    }

    fn with_entries<T>(&self, read: impl FnOnce(&HashMap<String, ConfigEntry>) -> T) -> Result<T> {
        {
            let guard = self.entries.read();
            if let Some(map) = guard.as_ref() {
                return Ok(read(map));
            }
        }

        // Load under the write lock so concurrent misses trigger one load.
        let mut guard = self.entries.write();
        if let Some(map) = guard.as_ref() {
            return Ok(read(map));
        }
        let loaded: HashMap<String, ConfigEntry> = self
            .store
            .get_all()?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        self.loads.fetch_add(1, Ordering::Relaxed);
        let out = read(&loaded);
        *guard = Some(loaded);
        Ok(out)
    }
}

impl StoreObserver for ConfigCache {
    fn on_write(&self, _entry: &ConfigEntry) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn fixture() -> (Arc<MemoryStore>, Arc<ConfigCache>) {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(Arc::clone(&store) as Arc<dyn ConfigStore>);
        (store, cache)
    }

    #[test]
    fn first_read_performs_single_bulk_load() {
        let (store, cache) = fixture();
        store.upsert("agent.prod_mode", "false", None, "seed").unwrap();
        assert!(!cache.is_populated());

        assert_eq!(cache.get_value("agent.prod_mode").unwrap().as_deref(), Some("false"));
        assert_eq!(cache.get_value("agent.simulation_mode").unwrap(), None);
        assert_eq!(cache.load_count(), 1);
        assert!(cache.is_populated());
    }

    #[test]
    fn get_or_falls_back_to_default() {
        let (_store, cache) = fixture();
        assert_eq!(cache.get_or("agent.autonomous_mode", "false").unwrap(), "false");
    }

    #[test]
    fn invalidate_forces_reload() {
        let (_store, cache) = fixture();
        cache.get("x.y").unwrap();
        cache.invalidate();
        assert!(!cache.is_populated());
        cache.get("x.y").unwrap();
        assert_eq!(cache.load_count(), 2);
    }

    #[test]
    fn write_through_cache_is_read_back() {
        let (_store, cache) = fixture();
        cache.get("agent.prod_mode").unwrap();
        cache.write("agent.prod_mode", "true", None, "alice").unwrap();
        assert_eq!(cache.get_value("agent.prod_mode").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn side_channel_store_write_invalidates() {
        let (store, cache) = fixture();
        store.upsert("agent.simulation_mode", "false", None, "seed").unwrap();
        assert_eq!(
            cache.get_value("agent.simulation_mode").unwrap().as_deref(),
            Some("false")
        );

        store.upsert("agent.simulation_mode", "true", None, "admin").unwrap();
        assert!(!cache.is_populated());
        assert_eq!(
            cache.get_value("agent.simulation_mode").unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn update_existing_skips_unknown_keys() {
        let (_store, cache) = fixture();
        assert!(cache.update_existing("agent.nope", "1", "bob").unwrap().is_none());
    }

    #[test]
    fn snapshot_is_sorted() {
        let (store, cache) = fixture();
        store.upsert("z.last", "1", None, "t").unwrap();
        store.upsert("a.first", "1", None, "t").unwrap();
        let keys: Vec<String> = cache.snapshot().unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a.first", "z.last"]);
    }
}
