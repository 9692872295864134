//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use finops_autopilot::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{FapError, Result};
pub use crate::engine::Engine;

// Store
pub use crate::store::memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteStore;
pub use crate::store::{ConfigEntry, ConfigStore, StoreObserver};

// Policy
pub use crate::policy::cache::ConfigCache;
pub use crate::policy::evaluator::{
    EvaluationResult, PolicyConfig, RecommendationCandidate, Veto, can_execute_autonomously,
    evaluate,
};
pub use crate::policy::modes::{AnalysisMethod, ModeController, ModeState, ProdModeStatus};
pub use crate::policy::settings::AgentSettings;

// Scheduled execution
pub use crate::daemon::job::{
    Dispatcher, Disposition, JsonFileSource, OptimizationPass, PassReport, RecommendationRecord,
    RecommendationSource,
};
pub use crate::daemon::scheduler::{Scheduler, SchedulerConfig};
pub use crate::daemon::signals::SignalFlags;
