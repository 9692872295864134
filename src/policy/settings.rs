//! Typed access to the `agent.*` policy settings.
//!
//! Absent keys resolve to the documented defaults; present keys that fail to
//! parse are reported, never coerced.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{FapError, Result};
use crate::policy::cache::ConfigCache;
use crate::policy::evaluator::{PolicyConfig, validate_risk_level, validate_savings};
use crate::policy::keys::{self, defaults};
use crate::store::ConfigEntry;

/// Dotted lower-case key, e.g. `agent.max_autonomous_risk_level`.
static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_\-]*)+$").expect("static key pattern compiles")
});

/// Recommendation type tag, e.g. `storage-class`.
static TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").expect("static type pattern compiles"));

/// Result of seeding defaults at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Keys written because they were absent.
    pub created: Vec<String>,
    /// Keys left alone because they already had a value.
    pub existing: Vec<String>,
}

/// Policy settings facade over the cache.
pub struct AgentSettings {
    cache: Arc<ConfigCache>,
    seed: PolicyConfig,
}

impl AgentSettings {
    /// `seed` supplies the values written by [`Self::seed_defaults`].
    #[must_use]
    pub fn new(cache: Arc<ConfigCache>, seed: PolicyConfig) -> Self {
        Self { cache, seed }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// Current policy configuration.
    pub fn policy_config(&self) -> Result<PolicyConfig> {
        let autonomous_mode_enabled = match self.cache.get_value(keys::AUTONOMOUS_MODE)? {
            Some(raw) => keys::decode_flag(keys::AUTONOMOUS_MODE, &raw)?,
            None => defaults::AUTONOMOUS_MODE,
        };
        let max_autonomous_risk_level = match self.cache.get_value(keys::MAX_AUTONOMOUS_RISK_LEVEL)? {
            Some(raw) => keys::decode_f64(keys::MAX_AUTONOMOUS_RISK_LEVEL, &raw)?,
            None => defaults::MAX_AUTONOMOUS_RISK_LEVEL,
        };
        let approval_required_above_savings =
            match self.cache.get_value(keys::APPROVAL_REQUIRED_ABOVE_SAVINGS)? {
                Some(raw) => keys::decode_i64(keys::APPROVAL_REQUIRED_ABOVE_SAVINGS, &raw)?,
                None => defaults::APPROVAL_REQUIRED_ABOVE_SAVINGS,
            };
        let auto_execute_types = match self.cache.get_value(keys::AUTO_EXECUTE_TYPES)? {
            Some(raw) => keys::decode_types(&raw),
            None => defaults::AUTO_EXECUTE_TYPES
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
        };

        let config = PolicyConfig {
            autonomous_mode_enabled,
            max_autonomous_risk_level,
            approval_required_above_savings,
            auto_execute_types,
        };
        config.validate().map_err(|e| FapError::InvalidConfig {
            details: format!("stored policy settings are inconsistent: {e}"),
        })?;
        Ok(config)
    }

    pub fn set_max_autonomous_risk_level(&self, value: f64, actor: &str) -> Result<f64> {
        validate_risk_level("maxAutonomousRiskLevel", value)?;
        self.write(keys::MAX_AUTONOMOUS_RISK_LEVEL, &value.to_string(), actor)?;
        Ok(value)
    }

    pub fn set_approval_required_above_savings(&self, value: i64, actor: &str) -> Result<i64> {
        validate_savings("approvalRequiredAboveSavings", value)?;
        self.write(keys::APPROVAL_REQUIRED_ABOVE_SAVINGS, &value.to_string(), actor)?;
        Ok(value)
    }

    /// Replace the auto-execute allow-list. An empty list disables every type.
    pub fn set_auto_execute_types<I, S>(&self, types: I, actor: &str) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in types {
            let tag = raw.as_ref().trim();
            if tag.is_empty() {
                continue;
            }
            if !TYPE_PATTERN.is_match(tag) {
                return Err(FapError::validation(
                    "autoExecuteTypes",
                    format!("invalid recommendation type {tag:?}"),
                ));
            }
            set.insert(tag.to_string());
        }
        self.write(keys::AUTO_EXECUTE_TYPES, &keys::encode_types(&set), actor)?;
        Ok(set)
    }

    /// Write each absent `agent.*` key with its seed value. Never overwrites.
    pub fn seed_defaults(&self, actor: &str) -> Result<SeedReport> {
        let seed = &self.seed;
        let risk = seed.max_autonomous_risk_level.to_string();
        let savings = seed.approval_required_above_savings.to_string();
        let types = keys::encode_types(&seed.auto_execute_types);
        let wanted: [(&str, &str); 6] = [
            (keys::AUTONOMOUS_MODE, keys::encode_flag(seed.autonomous_mode_enabled)),
            (keys::MAX_AUTONOMOUS_RISK_LEVEL, &risk),
            (keys::APPROVAL_REQUIRED_ABOVE_SAVINGS, &savings),
            (keys::AUTO_EXECUTE_TYPES, &types),
            (keys::PROD_MODE, keys::encode_flag(defaults::PROD_MODE)),
            (keys::SIMULATION_MODE, keys::encode_flag(defaults::SIMULATION_MODE)),
        ];

        let mut report = SeedReport::default();
        for (key, value) in wanted {
            // Ask the store directly: a stale cache must not cause an overwrite.
            if self.cache.store().get(key)?.is_some() {
                report.existing.push(key.to_string());
                continue;
            }
            self.cache
                .write(key, value, keys::description(key), actor)?;
            report.created.push(key.to_string());
        }
        Ok(report)
    }

    /// Admin side-channel: overwrite an existing key by name.
    ///
    /// Returns `None` when the key has never been set.
    pub fn put_system_config(
        &self,
        key: &str,
        value: &str,
        actor: &str,
    ) -> Result<Option<ConfigEntry>> {
        validate_key(key)?;
        if actor.trim().is_empty() {
            return Err(FapError::validation("updatedBy", "must not be empty"));
        }
        validate_value(key, value)?;
        self.cache.update_existing(key, value, actor)
    }

    /// Every stored setting.
    pub fn system_config(&self) -> Result<Vec<ConfigEntry>> {
        self.cache.snapshot()
    }

    fn write(&self, key: &str, value: &str, actor: &str) -> Result<ConfigEntry> {
        self.cache.write(key, value, keys::description(key), actor)
    }
}

/// Reject keys that are not dotted lower-case identifiers.
pub fn validate_key(key: &str) -> Result<()> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(FapError::validation("key", format!("malformed setting key {key:?}")))
    }
}

/// Check a raw value for a known `agent.*` key with the same rules the typed
/// setters apply. Unknown keys are passed through untouched.
pub fn validate_value(key: &str, value: &str) -> Result<()> {
    match key {
        keys::AUTONOMOUS_MODE | keys::PROD_MODE | keys::SIMULATION_MODE => {
            keys::parse_flag(key, value).map(|_| ())
        }
        keys::MAX_AUTONOMOUS_RISK_LEVEL => {
            let level = value.trim().parse::<f64>().map_err(|error| {
                FapError::validation(key, format!("expected a number, got {value:?}: {error}"))
            })?;
            validate_risk_level(key, level)
        }
        keys::APPROVAL_REQUIRED_ABOVE_SAVINGS => {
            let savings = value.trim().parse::<i64>().map_err(|error| {
                FapError::validation(key, format!("expected an integer, got {value:?}: {error}"))
            })?;
            validate_savings(key, savings)
        }
        keys::AUTO_EXECUTE_TYPES => {
            match keys::decode_types(value)
                .iter()
                .find(|tag| !TYPE_PATTERN.is_match(tag))
            {
                Some(tag) => Err(FapError::validation(
                    key,
                    format!("invalid recommendation type {tag:?}"),
                )),
                None => Ok(()),
            }
        }
        keys::PROD_MODE_ACTIVATED_AT => chrono::DateTime::parse_from_rfc3339(value.trim())
            .map(|_| ())
            .map_err(|error| {
                FapError::validation(key, format!("expected an RFC 3339 timestamp: {error}"))
            }),
        _ => Ok(()),
    }
}
