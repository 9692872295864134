//! Wiring: one store, one cache, and the policy facades over them.
//!
//! Every component shares the same [`ConfigCache`], so a write through any of
//! them (or straight to the store) is visible to all on the next read.

use std::sync::{Arc, Weak};
use std::thread;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{Config, StoreBackend};
use crate::core::errors::{FapError, Result};
use crate::daemon::job::OptimizationPass;
use crate::daemon::scheduler::{Scheduler, SchedulerConfig};
use crate::daemon::signals::SignalFlags;
use crate::logger::audit::{AuditHandle, spawn_audit_logger};
use crate::policy::cache::ConfigCache;
use crate::policy::modes::ModeController;
use crate::policy::settings::{AgentSettings, SeedReport};
use crate::store::memory::MemoryStore;
use crate::store::{ConfigStore, StoreObserver};

/// Fully wired policy engine.
pub struct Engine {
    store: Arc<dyn ConfigStore>,
    cache: Arc<ConfigCache>,
    settings: Arc<AgentSettings>,
    modes: Arc<ModeController>,
    audit: Option<Arc<AuditHandle>>,
    audit_join: Option<thread::JoinHandle<()>>,
    max_candidates: usize,
}

impl Engine {
    /// Open the configured store and, when enabled, start the audit writer.
    pub fn open(config: &Config) -> Result<Self> {
        let store = open_store(config)?;
        let mut engine = Self::with_store(store, Arc::new(SystemClock), config);
        if config.audit.enabled {
            let (handle, join) =
                spawn_audit_logger(config.audit.jsonl_config(), config.audit.channel_capacity)?;
            let handle = Arc::new(handle);
            engine
                .store
                .subscribe(Arc::downgrade(&handle) as Weak<dyn StoreObserver>);
            engine.audit = Some(handle);
            engine.audit_join = Some(join);
        }
        Ok(engine)
    }

    /// Build over an existing store without auditing.
    #[must_use]
    pub fn with_store(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let cache = ConfigCache::new(Arc::clone(&store));
        let settings = Arc::new(AgentSettings::new(
            Arc::clone(&cache),
            config.policy.seed.to_policy(),
        ));
        let modes = Arc::new(ModeController::new(
            Arc::clone(&cache),
            clock,
            config.prod_mode_window(),
        ));
        Self {
            store,
            cache,
            settings,
            modes,
            audit: None,
            audit_join: None,
            max_candidates: config.schedule.max_candidates_per_pass,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    #[must_use]
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    #[must_use]
    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    #[must_use]
    pub fn audit(&self) -> Option<&AuditHandle> {
        self.audit.as_deref()
    }

    /// Write absent policy keys with their seed values.
    pub fn seed(&self, actor: &str) -> Result<SeedReport> {
        self.settings.seed_defaults(actor)
    }

    #[must_use]
    pub fn pass(&self) -> OptimizationPass {
        OptimizationPass::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.modes),
            self.audit().cloned(),
            self.max_candidates,
        )
    }

    #[must_use]
    pub fn scheduler(&self, flags: SignalFlags, config: SchedulerConfig) -> Scheduler {
        Scheduler::new(
            self.pass(),
            Arc::clone(&self.cache),
            flags,
            self.audit().cloned(),
            config,
        )
    }

    /// Drain the audit trail and stop its thread.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.audit.take() {
            handle.shutdown();
        }
        if let Some(join) = self.audit_join.take() {
            join.join().map_err(|_| FapError::Runtime {
                details: "audit thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn ConfigStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(crate::store::sqlite::SqliteStore::open(
            &config.store.sqlite_path,
        )?)),
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(FapError::InvalidConfig {
            details: "store.backend = \"sqlite\" requires the sqlite feature".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::keys;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.audit.enabled = false;
        config
    }

    #[test]
    fn components_share_one_cache() {
        let engine = Engine::open(&memory_config()).unwrap();
        engine.seed("startup").unwrap();
        engine.modes().set_autonomous_mode(true, "ops").unwrap();
        assert!(engine.settings().policy_config().unwrap().autonomous_mode_enabled);
        engine.shutdown().unwrap();
    }

    #[test]
    fn seed_uses_configured_values() {
        let mut config = memory_config();
        config.policy.seed.max_autonomous_risk_level = 9.0;
        let engine = Engine::open(&config).unwrap();
        engine.seed("startup").unwrap();
        let stored = engine
            .store()
            .get(keys::MAX_AUTONOMOUS_RISK_LEVEL)
            .unwrap()
            .unwrap();
        assert_eq!(stored.value, "9");
    }

    #[test]
    fn audit_records_config_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.audit.enabled = true;
        config.audit.path = dir.path().join("audit.jsonl");
        config.audit.fallback_path = None;

        let engine = Engine::open(&config).unwrap();
        engine.modes().set_simulation_mode(true, "carol").unwrap();
        engine.shutdown().unwrap();

        let log = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert!(log.contains("\"key\":\"agent.simulation_mode\""));
        assert!(log.contains("\"actor\":\"carol\""));
    }
}
