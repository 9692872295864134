//! Periodic pass loop.
//!
//! Sleeps in short ticks so signal flags are noticed promptly. A failed pass is
//! reported and retried at the next interval; it never stops the loop.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::errors::Result;
use crate::daemon::job::{Dispatcher, OptimizationPass, PassReport, RecommendationSource};
use crate::daemon::signals::SignalFlags;
use crate::logger::audit::{AuditEvent, AuditHandle};
use crate::policy::cache::ConfigCache;

/// Default time between passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

const DEFAULT_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Sleep granularity between flag checks.
    pub tick: Duration,
    /// Run a pass as soon as the loop starts instead of after one interval.
    pub run_immediately: bool,
    /// Stop after this many passes; `None` runs until shutdown.
    pub max_passes: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tick: DEFAULT_TICK,
            run_immediately: true,
            max_passes: None,
        }
    }
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub invalidations: u64,
    pub executed: u64,
    pub approvals_requested: u64,
}

impl SchedulerStats {
    fn absorb(&mut self, report: &PassReport) {
        use crate::daemon::job::Disposition;
        self.executed += report.count(Disposition::Executed) as u64;
        self.approvals_requested += report.count(Disposition::ApprovalRequested) as u64;
    }
}

pub struct Scheduler {
    pass: OptimizationPass,
    cache: Arc<ConfigCache>,
    flags: SignalFlags,
    audit: Option<AuditHandle>,
    config: SchedulerConfig,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        pass: OptimizationPass,
        cache: Arc<ConfigCache>,
        flags: SignalFlags,
        audit: Option<AuditHandle>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pass,
            cache,
            flags,
            audit,
            config,
        }
    }

    #[must_use]
    pub fn flags(&self) -> &SignalFlags {
        &self.flags
    }

    /// Run until shutdown is requested or `max_passes` is reached.
    pub fn run(
        &self,
        source: &dyn RecommendationSource,
        dispatcher: &dyn Dispatcher,
        config_hash: &str,
    ) -> Result<SchedulerStats> {
        self.emit(AuditEvent::SchedulerStarted {
            config_hash: config_hash.to_string(),
        });

        let mut stats = SchedulerStats::default();
        let mut last_pass: Option<Instant> = None;
        let reason = loop {
            if self.flags.should_shutdown() {
                break "signal";
            }

            if self.flags.take_invalidate() {
                self.cache.invalidate();
                stats.invalidations += 1;
                eprintln!("[FAP-SCHED] settings cache invalidated");
                self.emit(AuditEvent::CacheInvalidated {
                    reason: "SIGHUP".to_string(),
                });
            }

            let due = match last_pass {
                None => self.config.run_immediately,
                Some(at) => at.elapsed() >= self.config.interval,
            };
            if self.flags.take_run_now() || due {
                last_pass = Some(Instant::now());
                stats.passes += 1;
                match self.pass.run(source, dispatcher) {
                    Ok(report) => {
                        eprintln!("[FAP-SCHED] pass {} done: {}", stats.passes, report.summary());
                        stats.absorb(&report);
                    }
                    Err(e) => {
                        stats.failed_passes += 1;
                        eprintln!("[FAP-SCHED] pass {} failed: {e}", stats.passes);
                    }
                }
                if self.config.max_passes.is_some_and(|max| stats.passes >= max) {
                    break "max_passes";
                }
            } else if last_pass.is_none() {
                // Deferred first pass: start the interval clock now.
                last_pass = Some(Instant::now());
            }

            thread::sleep(self.config.tick);
        };

        self.emit(AuditEvent::SchedulerStopped {
            reason: reason.to_string(),
            passes: stats.passes,
        });
        Ok(stats)
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::clock::{Clock, SystemClock};
    use crate::core::errors::FapError;
    use crate::daemon::job::{RecommendationRecord, ReportingDispatcher};
    use crate::policy::evaluator::PolicyConfig;
    use crate::policy::modes::{DEFAULT_PROD_MODE_WINDOW, ModeController};
    use crate::policy::settings::AgentSettings;
    use crate::store::ConfigStore;
    use crate::store::memory::MemoryStore;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
        flags: Option<SignalFlags>,
    }

    impl RecommendationSource for CountingSource {
        fn pending(&self) -> Result<Vec<RecommendationRecord>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if let Some(flags) = &self.flags {
                flags.request_shutdown();
            }
            if self.fail {
                return Err(FapError::Runtime {
                    details: "source unavailable".to_string(),
                });
            }
            Ok(Vec::new())
        }
    }

    fn source(fail: bool, flags: Option<SignalFlags>) -> CountingSource {
        CountingSource {
            calls: AtomicUsize::new(0),
            fail,
            flags,
        }
    }

    fn scheduler(config: SchedulerConfig) -> (Arc<ConfigCache>, Scheduler) {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(store as Arc<dyn ConfigStore>);
        let settings = Arc::new(AgentSettings::new(Arc::clone(&cache), PolicyConfig::default()));
        let modes = Arc::new(ModeController::new(
            Arc::clone(&cache),
            Arc::new(SystemClock) as Arc<dyn Clock>,
            DEFAULT_PROD_MODE_WINDOW,
        ));
        let pass = OptimizationPass::new(settings, modes, None, 10);
        let sched = Scheduler::new(pass, Arc::clone(&cache), SignalFlags::new(), None, config);
        (cache, sched)
    }

    fn quick(max_passes: Option<u64>) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            tick: Duration::from_millis(1),
            run_immediately: true,
            max_passes,
        }
    }

    #[test]
    fn single_pass_then_exit() {
        let (_cache, sched) = scheduler(quick(Some(1)));
        let src = source(false, None);
        let stats = sched.run(&src, &ReportingDispatcher, "h").unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(src.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn shutdown_before_start_runs_nothing() {
        let (_cache, sched) = scheduler(quick(None));
        sched.flags().request_shutdown();
        let src = source(false, None);
        let stats = sched.run(&src, &ReportingDispatcher, "h").unwrap();
        assert_eq!(stats.passes, 0);
    }

    #[test]
    fn failed_pass_is_counted_not_fatal() {
        let (_cache, sched) = scheduler(quick(Some(1)));
        let stats = sched.run(&source(true, None), &ReportingDispatcher, "h").unwrap();
        assert_eq!(stats.failed_passes, 1);
    }

    #[test]
    fn invalidate_flag_clears_cache() {
        let (cache, sched) = scheduler(quick(Some(1)));
        cache.get("agent.prod_mode").unwrap();
        assert!(cache.is_populated());
        sched.flags().request_invalidate();
        let stats = sched.run(&source(false, None), &ReportingDispatcher, "h").unwrap();
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn run_now_overrides_deferred_start() {
        let mut config = quick(None);
        config.run_immediately = false;
        let (_cache, sched) = scheduler(config);
        sched.flags().request_run_now();
        let src = source(false, Some(sched.flags().clone()));
        let stats = sched.run(&src, &ReportingDispatcher, "h").unwrap();
        assert_eq!(stats.passes, 1);
    }
}
