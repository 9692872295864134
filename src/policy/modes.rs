//! Operating-mode flags: autonomous execution, prod (AI-assisted) analysis,
//! and simulation.
//!
//! The three flags are independent. Only prod mode is temporal: enabling it
//! stamps an activation time, and it reads as off once the configured window
//! has elapsed. Expiry is computed at read time from the stored timestamp, so
//! no background timer is needed; [`ModeController::revert_expired_prod_mode`]
//! persists the revert when a caller wants the stored flag to heal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::clock::Clock;
use crate::core::errors::Result;
use crate::policy::cache::ConfigCache;
use crate::policy::keys::{self, defaults};

/// Default prod-mode window. Bounds spend on the external AI service.
pub const DEFAULT_PROD_MODE_WINDOW: Duration = Duration::from_secs(30);

/// Actor recorded when the engine itself reverts prod mode.
pub const AUTO_REVERT_ACTOR: &str = "system:prod-mode-expiry";

/// How recommendations are analysed while a mode snapshot is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    /// Static heuristics.
    Heuristic,
    /// External LLM with retrieval context.
    AiAssisted,
}

impl fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heuristic => write!(f, "heuristic"),
            Self::AiAssisted => write!(f, "ai_assisted"),
        }
    }
}

/// Prod-mode view returned by toggles and status reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProdModeStatus {
    /// Effective flag: false once the window has elapsed.
    pub enabled: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: u64,
    pub window_secs: u64,
}

/// Effective snapshot of every mode flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeState {
    pub autonomous_mode_enabled: bool,
    pub prod_mode: ProdModeStatus,
    pub simulation_mode_enabled: bool,
}

impl ModeState {
    #[must_use]
    pub fn analysis_method(&self) -> AnalysisMethod {
        if self.prod_mode.enabled {
            AnalysisMethod::AiAssisted
        } else {
            AnalysisMethod::Heuristic
        }
    }
}

/// Reads and toggles mode flags through the settings cache.
pub struct ModeController {
    cache: Arc<ConfigCache>,
    clock: Arc<dyn Clock>,
    prod_window: Duration,
}

impl ModeController {
    #[must_use]
    pub fn new(cache: Arc<ConfigCache>, clock: Arc<dyn Clock>, prod_window: Duration) -> Self {
        Self {
            cache,
            clock,
            prod_window,
        }
    }

    /// Configured prod-mode window.
    #[must_use]
    pub fn prod_window(&self) -> Duration {
        self.prod_window
    }

    /// Enable or disable prod mode.
    ///
    /// Enabling writes the flag and a fresh activation timestamp in one batch.
    /// Disabling writes only the flag; the last activation time is kept for
    /// audit.
    pub fn set_prod_mode(&self, enabled: bool, actor: &str) -> Result<ProdModeStatus> {
        let window_secs = self.prod_window.as_secs();
        if enabled {
            let now = self.clock.now();
            let encoded = keys::encode_timestamp(now);
            self.cache.write_many(
                &[
                    (keys::PROD_MODE_ACTIVATED_AT, encoded.as_str()),
                    (keys::PROD_MODE, keys::encode_flag(true)),
                ],
                actor,
            )?;
            // Built from what was just written; no read-back after the commit.
            return Ok(ProdModeStatus {
                enabled: window_secs > 0,
                activated_at: Some(now),
                time_remaining_secs: window_secs,
                window_secs,
            });
        }

        let activated_at = self.stored_activation()?;
        self.cache.write(
            keys::PROD_MODE,
            keys::encode_flag(false),
            keys::description(keys::PROD_MODE),
            actor,
        )?;
        Ok(ProdModeStatus {
            enabled: false,
            activated_at,
            time_remaining_secs: 0,
            window_secs,
        })
    }

    /// Seconds left before prod mode reverts; 0 when off or expired.
    pub fn time_remaining(&self) -> Result<u64> {
        Ok(self.prod_mode_status()?.time_remaining_secs)
    }

    /// Effective prod-mode status at the current clock reading.
    pub fn prod_mode_status(&self) -> Result<ProdModeStatus> {
        let stored = self.stored_prod_flag()?;
        let activated_at = self.stored_activation()?;
        let remaining = match (stored, activated_at) {
            (true, Some(at)) => self.remaining_since(at),
            _ => 0,
        };
        Ok(ProdModeStatus {
            enabled: remaining > 0,
            activated_at,
            time_remaining_secs: remaining,
            window_secs: self.prod_window.as_secs(),
        })
    }

    /// Persist the revert if the stored flag is on but the window has elapsed.
    ///
    /// Returns `true` when a revert was written.
    pub fn revert_expired_prod_mode(&self, actor: &str) -> Result<bool> {
        if !self.stored_prod_flag()? {
            return Ok(false);
        }
        if self.prod_mode_status()?.enabled {
            return Ok(false);
        }
        self.cache.write(
            keys::PROD_MODE,
            keys::encode_flag(false),
            keys::description(keys::PROD_MODE),
            actor,
        )?;
        Ok(true)
    }

    /// Flip the autonomous-execution kill-switch.
    pub fn set_autonomous_mode(&self, enabled: bool, actor: &str) -> Result<bool> {
        self.write_flag(keys::AUTONOMOUS_MODE, enabled, actor)
    }

    /// Flip simulation (dry-run) mode.
    pub fn set_simulation_mode(&self, enabled: bool, actor: &str) -> Result<bool> {
        self.write_flag(keys::SIMULATION_MODE, enabled, actor)
    }

    pub fn autonomous_mode(&self) -> Result<bool> {
        self.read_flag(keys::AUTONOMOUS_MODE, defaults::AUTONOMOUS_MODE)
    }

    pub fn simulation_mode(&self) -> Result<bool> {
        self.read_flag(keys::SIMULATION_MODE, defaults::SIMULATION_MODE)
    }

    /// Snapshot of every flag, with prod-mode expiry applied.
    pub fn mode_state(&self) -> Result<ModeState> {
        Ok(ModeState {
            autonomous_mode_enabled: self.autonomous_mode()?,
            prod_mode: self.prod_mode_status()?,
            simulation_mode_enabled: self.simulation_mode()?,
        })
    }

    fn remaining_since(&self, activated_at: DateTime<Utc>) -> u64 {
        // A timestamp ahead of our clock counts as zero elapsed.
        let elapsed = (self.clock.now() - activated_at).num_seconds().max(0);
        let elapsed = u64::try_from(elapsed).unwrap_or(u64::MAX);
        self.prod_window.as_secs().saturating_sub(elapsed)
    }

    fn stored_prod_flag(&self) -> Result<bool> {
        self.read_flag(keys::PROD_MODE, defaults::PROD_MODE)
    }

    fn stored_activation(&self) -> Result<Option<DateTime<Utc>>> {
        self.cache
            .get_value(keys::PROD_MODE_ACTIVATED_AT)?
            .map(|raw| keys::decode_timestamp(keys::PROD_MODE_ACTIVATED_AT, &raw))
            .transpose()
    }

    fn read_flag(&self, key: &str, default: bool) -> Result<bool> {
        self.cache
            .get_value(key)?
            .map_or(Ok(default), |raw| keys::decode_flag(key, &raw))
    }

    fn write_flag(&self, key: &str, enabled: bool, actor: &str) -> Result<bool> {
        self.cache
            .write(key, keys::encode_flag(enabled), keys::description(key), actor)?;
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::store::ConfigStore;
    use crate::store::memory::MemoryStore;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture() -> (Arc<MemoryStore>, Arc<ManualClock>, ModeController) {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(Arc::clone(&store) as Arc<dyn ConfigStore>);
        let clock = Arc::new(ManualClock::new(start()));
        let modes = ModeController::new(
            cache,
            Arc::clone(&clock) as Arc<dyn Clock>,
            DEFAULT_PROD_MODE_WINDOW,
        );
        (store, clock, modes)
    }

    #[test]
    fn everything_off_by_default() {
        let (_store, _clock, modes) = fixture();
        let state = modes.mode_state().unwrap();
        assert!(!state.autonomous_mode_enabled);
        assert!(!state.simulation_mode_enabled);
        assert!(!state.prod_mode.enabled);
        assert_eq!(state.prod_mode.time_remaining_secs, 0);
        assert_eq!(state.analysis_method(), AnalysisMethod::Heuristic);
    }

    #[test]
    fn enabling_prod_mode_reports_full_window() {
        let (_store, _clock, modes) = fixture();
        let status = modes.set_prod_mode(true, "alice").unwrap();
        assert!(status.enabled);
        assert_eq!(status.time_remaining_secs, 30);
        assert_eq!(status.activated_at, Some(start()));
        assert_eq!(modes.time_remaining().unwrap(), 30);
    }

    #[test]
    fn prod_mode_counts_down_and_expires() {
        let (_store, clock, modes) = fixture();
        modes.set_prod_mode(true, "alice").unwrap();

        clock.advance_secs(12);
        assert_eq!(modes.time_remaining().unwrap(), 18);

        clock.advance_secs(19);
        assert_eq!(modes.time_remaining().unwrap(), 0);
        let state = modes.mode_state().unwrap();
        assert!(!state.prod_mode.enabled);
        assert_eq!(state.analysis_method(), AnalysisMethod::Heuristic);
    }

    #[test]
    fn prod_mode_is_off_exactly_at_window_end() {
        let (_store, clock, modes) = fixture();
        modes.set_prod_mode(true, "alice").unwrap();
        clock.advance_secs(29);
        assert!(modes.prod_mode_status().unwrap().enabled);
        clock.advance_secs(1);
        assert!(!modes.prod_mode_status().unwrap().enabled);
    }

    #[test]
    fn explicit_disable_zeroes_remaining() {
        let (_store, _clock, modes) = fixture();
        modes.set_prod_mode(true, "alice").unwrap();
        let status = modes.set_prod_mode(false, "alice").unwrap();
        assert!(!status.enabled);
        assert_eq!(status.time_remaining_secs, 0);
        assert_eq!(status.activated_at, Some(start()));
    }

    #[test]
    fn revert_persists_expiry_once() {
        let (store, clock, modes) = fixture();
        modes.set_prod_mode(true, "alice").unwrap();
        assert!(!modes.revert_expired_prod_mode(AUTO_REVERT_ACTOR).unwrap());

        clock.advance_secs(45);
        assert_eq!(store.get(keys::PROD_MODE).unwrap().unwrap().value, "true");
        assert!(modes.revert_expired_prod_mode(AUTO_REVERT_ACTOR).unwrap());
        let stored = store.get(keys::PROD_MODE).unwrap().unwrap();
        assert_eq!(stored.value, "false");
        assert_eq!(stored.updated_by.as_deref(), Some(AUTO_REVERT_ACTOR));
        assert!(!modes.revert_expired_prod_mode(AUTO_REVERT_ACTOR).unwrap());
    }

    #[test]
    fn future_activation_clamps_to_window() {
        let (_store, clock, modes) = fixture();
        modes.set_prod_mode(true, "alice").unwrap();
        clock.advance_secs(-120);
        assert_eq!(modes.time_remaining().unwrap(), 30);
    }

    #[test]
    fn custom_window_is_honoured() {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(store as Arc<dyn ConfigStore>);
        let clock = Arc::new(ManualClock::new(start()));
        let modes = ModeController::new(
            cache,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Duration::from_secs(120),
        );
        let status = modes.set_prod_mode(true, "ops").unwrap();
        assert_eq!(status.window_secs, 120);
        clock.advance_secs(100);
        assert_eq!(modes.time_remaining().unwrap(), 20);
    }

    #[test]
    fn autonomous_and_simulation_toggle_independently() {
        let (_store, _clock, modes) = fixture();
        assert!(modes.set_autonomous_mode(true, "ops").unwrap());
        assert!(modes.set_simulation_mode(true, "ops").unwrap());
        modes.set_prod_mode(true, "ops").unwrap();
        assert!(!modes.set_autonomous_mode(false, "ops").unwrap());

        let state = modes.mode_state().unwrap();
        assert!(!state.autonomous_mode_enabled);
        assert!(state.simulation_mode_enabled);
        assert!(state.prod_mode.enabled);
        assert_eq!(state.analysis_method(), AnalysisMethod::AiAssisted);
    }

    #[test]
    fn corrupt_stored_flag_is_invalid_config() {
        let (store, _clock, modes) = fixture();
        store
            .upsert(keys::SIMULATION_MODE, "sometimes", None, "admin")
            .unwrap();
        let err = modes.simulation_mode().unwrap_err();
        assert_eq!(err.code(), "FAP-1001");
    }
}
