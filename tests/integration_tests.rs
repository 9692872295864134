//! Library-level scenarios: policy, modes, and cache wired over real stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Weak};
use std::thread;

use chrono::{DateTime, Utc};

use finops_autopilot::core::clock::{Clock, ManualClock};
use finops_autopilot::core::config::Config;
use finops_autopilot::core::errors::{FapError, Result};
use finops_autopilot::engine::Engine;
use finops_autopilot::policy::evaluator::{RecommendationCandidate, can_execute_autonomously};
use finops_autopilot::policy::keys;
use finops_autopilot::policy::modes::AnalysisMethod;
use finops_autopilot::store::memory::MemoryStore;
use finops_autopilot::store::sqlite::SqliteStore;
use finops_autopilot::store::{ConfigEntry, ConfigStore, StoreObserver};

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn engine_over(store: Arc<dyn ConfigStore>) -> (Arc<ManualClock>, Engine) {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = Engine::with_store(
        store,
        Arc::clone(&clock) as Arc<dyn Clock>,
        &Config::default(),
    );
    engine.seed("startup").unwrap();
    (clock, engine)
}

/// Store whose reads or writes can be switched to fail.
struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(FapError::Persistence {
                context: "flaky",
                details: "disk unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl ConfigStore for FlakyStore {
    fn get_all(&self) -> Result<Vec<ConfigEntry>> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(FapError::Persistence {
                context: "flaky",
                details: "read timed out".to_string(),
            });
        }
        self.inner.get_all()
    }

    fn get(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.inner.get(key)
    }

    fn upsert(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<ConfigEntry> {
        self.check()?;
        self.inner.upsert(key, value, description, updated_by)
    }

    fn update(&self, key: &str, value: &str, updated_by: &str) -> Result<Option<ConfigEntry>> {
        self.check()?;
        self.inner.update(key, value, updated_by)
    }

    fn upsert_many(&self, pairs: &[(&str, &str)], updated_by: &str) -> Result<Vec<ConfigEntry>> {
        self.check()?;
        self.inner.upsert_many(pairs, updated_by)
    }

    fn subscribe(&self, observer: Weak<dyn StoreObserver>) {
        self.inner.subscribe(observer);
    }
}

#[test]
fn concrete_scenario() {
    let (_clock, engine) = engine_over(Arc::new(MemoryStore::new()));
    engine.modes().set_autonomous_mode(true, "ops").unwrap();
    let policy = engine.settings().policy_config().unwrap();

    assert!(can_execute_autonomously(
        &RecommendationCandidate::new("resize", 3.0, 5_000_000),
        &policy
    ));
    assert!(!can_execute_autonomously(
        &RecommendationCandidate::new("resize", 8.0, 5_000_000),
        &policy
    ));
    assert!(!can_execute_autonomously(
        &RecommendationCandidate::new("terminate", 1.0, 100),
        &policy
    ));
}

#[test]
fn prod_mode_expires_without_explicit_disable() {
    let (clock, engine) = engine_over(Arc::new(MemoryStore::new()));

    let status = engine.modes().set_prod_mode(true, "alice").unwrap();
    assert_eq!(status.time_remaining_secs, 30);
    assert_eq!(engine.modes().mode_state().unwrap().analysis_method(), AnalysisMethod::AiAssisted);

    clock.advance_secs(31);
    assert_eq!(engine.modes().time_remaining().unwrap(), 0);
    let state = engine.modes().mode_state().unwrap();
    assert!(!state.prod_mode.enabled);
    assert_eq!(state.analysis_method(), AnalysisMethod::Heuristic);
}

#[test]
fn failed_write_leaves_cache_and_state_unchanged() {
    let store = Arc::new(FlakyStore::new());
    let (_clock, engine) = engine_over(Arc::clone(&store) as Arc<dyn ConfigStore>);

    let before = engine.settings().policy_config().unwrap();
    let loads = engine.cache().load_count();
    assert!(engine.cache().is_populated());

    store.fail_writes.store(true, Ordering::Relaxed);
    let err = engine
        .settings()
        .set_max_autonomous_risk_level(50.0, "ops")
        .unwrap_err();
    assert_eq!(err.code(), "FAP-2001");
    assert_eq!(err.http_status(), 500);
    assert_eq!(err.public_message(), "failed to persist configuration");

    assert!(engine.modes().set_prod_mode(true, "ops").is_err());
    assert!(engine.cache().is_populated());
    assert_eq!(engine.cache().load_count(), loads);
    assert_eq!(engine.settings().policy_config().unwrap(), before);
    assert!(!engine.modes().prod_mode_status().unwrap().enabled);
    assert!(store.get(keys::PROD_MODE_ACTIVATED_AT).unwrap().is_none());
}

#[test]
fn prod_mode_toggle_reports_success_when_reload_fails() {
    let store = Arc::new(FlakyStore::new());
    let (_clock, engine) = engine_over(Arc::clone(&store) as Arc<dyn ConfigStore>);

    store.fail_reads.store(true, Ordering::Relaxed);
    let status = engine.modes().set_prod_mode(true, "alice").unwrap();
    assert!(status.enabled);
    assert_eq!(status.time_remaining_secs, 30);
    assert_eq!(status.activated_at, Some(start()));
    assert_eq!(store.get(keys::PROD_MODE).unwrap().unwrap().value, "true");

    // Reads after the commit still surface the outage.
    assert!(engine.modes().prod_mode_status().is_err());
}

#[test]
fn side_channel_write_is_visible_to_policy_reads() {
    let store = Arc::new(MemoryStore::new());
    let (_clock, engine) = engine_over(Arc::clone(&store) as Arc<dyn ConfigStore>);
    assert!(!engine.settings().policy_config().unwrap().autonomous_mode_enabled);

    // Bypass every typed setter.
    store
        .update(keys::AUTONOMOUS_MODE, "true", "admin-console")
        .unwrap()
        .unwrap();
    assert!(engine.settings().policy_config().unwrap().autonomous_mode_enabled);
}

#[test]
fn validation_error_maps_to_bad_request() {
    let (_clock, engine) = engine_over(Arc::new(MemoryStore::new()));
    let err = engine
        .settings()
        .set_max_autonomous_risk_level(-3.0, "ops")
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert!(err.public_message().contains("maxAutonomousRiskLevel"));
    assert!(!err.is_retryable());
}

#[test]
fn concurrent_first_reads_load_once() {
    let (_clock, engine) = engine_over(Arc::new(MemoryStore::new()));
    engine.cache().invalidate();
    let loads_before = engine.cache().load_count();

    let cache = Arc::clone(engine.cache());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_value(keys::PROD_MODE).unwrap()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap().as_deref(), Some("false"));
    }
    assert_eq!(cache.load_count(), loads_before + 1);
}

#[test]
fn sqlite_settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.sqlite3");

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let (_clock, engine) = engine_over(store);
        engine
            .settings()
            .set_auto_execute_types(["resize", "rightsizing"], "ops")
            .unwrap();
        engine.modes().set_prod_mode(true, "alice").unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let (clock, engine) = engine_over(store);
    let policy = engine.settings().policy_config().unwrap();
    assert!(policy.auto_execute_types.contains("rightsizing"));

    // Same clock origin: the stored activation still has its full window.
    assert_eq!(engine.modes().time_remaining().unwrap(), 30);
    clock.advance_secs(30);
    assert!(!engine.modes().prod_mode_status().unwrap().enabled);
}
