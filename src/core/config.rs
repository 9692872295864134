//! Application configuration: TOML file + `FAP_*` env overrides + defaults.
//!
//! This is process configuration (where the store lives, how often passes
//! run). The policy itself lives in the configuration store and is edited at
//! runtime; the `[policy.seed]` table only supplies first-boot values.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{FapError, Result};
use crate::logger::jsonl::JsonlConfig;
use crate::policy::evaluator::PolicyConfig;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub policy: PolicySection,
    pub schedule: ScheduleConfig,
    pub audit: AuditConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// Process-local; settings vanish on exit.
    Memory,
}

impl StoreBackend {
    fn parse(name: &str, raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(FapError::ConfigParse {
                context: "env",
                details: format!("{name}={other:?}: expected sqlite or memory"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicySection {
    /// How long prod (AI-assisted) mode stays on after activation.
    pub prod_mode_window_secs: u64,
    /// Actor recorded on seeded settings.
    pub seed_actor: String,
    pub seed: SeedConfig,
}

/// First-boot policy values; never overwrite stored settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeedConfig {
    pub autonomous_mode: bool,
    pub max_autonomous_risk_level: f64,
    /// Thousandths of a currency unit.
    pub approval_required_above_savings: i64,
    pub auto_execute_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    pub max_candidates_per_pass: usize,
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[FAP-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("fap")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: data_dir().join("settings.sqlite3"),
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            prod_mode_window_secs: 30,
            seed_actor: "system:seed".to_string(),
            seed: SeedConfig::default(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        let policy = PolicyConfig::default();
        Self {
            autonomous_mode: policy.autonomous_mode_enabled,
            max_autonomous_risk_level: policy.max_autonomous_risk_level,
            approval_required_above_savings: policy.approval_required_above_savings,
            auto_execute_types: policy.auto_execute_types.into_iter().collect(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 60 * 60,
            max_candidates_per_pass: 100,
            tick_ms: 250,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("audit.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/fap-audit.jsonl")),
            max_size_bytes: 32 * 1024 * 1024,
            max_rotated_files: 5,
            channel_capacity: 1024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: home_dir().join(".config").join("fap").join("config.toml"),
        }
    }
}

impl SeedConfig {
    /// Seed values as a policy.
    #[must_use]
    pub fn to_policy(&self) -> PolicyConfig {
        PolicyConfig {
            autonomous_mode_enabled: self.autonomous_mode,
            max_autonomous_risk_level: self.max_autonomous_risk_level,
            approval_required_above_savings: self.approval_required_above_savings,
            auto_execute_types: self
                .auto_execute_types
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl AuditConfig {
    #[must_use]
    pub fn jsonl_config(&self) -> JsonlConfig {
        JsonlConfig {
            path: self.path.clone(),
            fallback_path: self.fallback_path.clone(),
            max_size_bytes: self.max_size_bytes,
            max_rotated_files: self.max_rotated_files,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load from the default or an explicit path, then apply env overrides.
    ///
    /// A missing file at the default path yields defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|e| FapError::io(&path_buf, e))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(FapError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// SHA-256 of the canonical JSON form, hex encoded. Stable across runs.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
    }

    #[must_use]
    pub fn prod_mode_window(&self) -> Duration {
        Duration::from_secs(self.policy.prod_mode_window_secs)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("FAP_STORE_BACKEND") {
            self.store.backend = StoreBackend::parse("FAP_STORE_BACKEND", &raw)?;
        }
        if let Some(raw) = lookup("FAP_STORE_SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("FAP_PROD_MODE_WINDOW_SECS") {
            self.policy.prod_mode_window_secs = parse_env("FAP_PROD_MODE_WINDOW_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FAP_SEED_AUTONOMOUS_MODE") {
            self.policy.seed.autonomous_mode = parse_env("FAP_SEED_AUTONOMOUS_MODE", &raw)?;
        }
        if let Some(raw) = lookup("FAP_SEED_MAX_AUTONOMOUS_RISK_LEVEL") {
            self.policy.seed.max_autonomous_risk_level =
                parse_env("FAP_SEED_MAX_AUTONOMOUS_RISK_LEVEL", &raw)?;
        }
        if let Some(raw) = lookup("FAP_SEED_APPROVAL_REQUIRED_ABOVE_SAVINGS") {
            self.policy.seed.approval_required_above_savings =
                parse_env("FAP_SEED_APPROVAL_REQUIRED_ABOVE_SAVINGS", &raw)?;
        }
        if let Some(raw) = lookup("FAP_SEED_AUTO_EXECUTE_TYPES") {
            self.policy.seed.auto_execute_types = raw
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(raw) = lookup("FAP_SCHEDULE_INTERVAL_SECS") {
            self.schedule.interval_secs = parse_env("FAP_SCHEDULE_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FAP_SCHEDULE_MAX_CANDIDATES") {
            self.schedule.max_candidates_per_pass = parse_env("FAP_SCHEDULE_MAX_CANDIDATES", &raw)?;
        }

        if let Some(raw) = lookup("FAP_AUDIT_ENABLED") {
            self.audit.enabled = parse_env("FAP_AUDIT_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("FAP_AUDIT_PATH") {
            self.audit.path = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.policy.prod_mode_window_secs == 0 {
            return Err(invalid("policy.prod_mode_window_secs must be > 0"));
        }
        if self.policy.seed_actor.trim().is_empty() {
            return Err(invalid("policy.seed_actor must not be empty"));
        }
        self.policy
            .seed
            .to_policy()
            .validate()
            .map_err(|e| invalid(&format!("policy.seed: {e}")))?;

        if self.schedule.interval_secs == 0 {
            return Err(invalid("schedule.interval_secs must be > 0"));
        }
        if self.schedule.max_candidates_per_pass == 0 {
            return Err(invalid("schedule.max_candidates_per_pass must be > 0"));
        }
        let interval_ms = self.schedule.interval_secs.saturating_mul(1000);
        if self.schedule.tick_ms == 0 || self.schedule.tick_ms > interval_ms {
            return Err(invalid("schedule.tick_ms must be in (0, interval]"));
        }

        if self.audit.max_size_bytes < 4096 {
            return Err(invalid("audit.max_size_bytes must be >= 4096"));
        }
        if self.audit.channel_capacity == 0 {
            return Err(invalid("audit.channel_capacity must be > 0"));
        }
        if self.store.backend == StoreBackend::Sqlite
            && self.store.sqlite_path.as_os_str().is_empty()
        {
            return Err(invalid("store.sqlite_path must be set for the sqlite backend"));
        }
        Ok(())
    }
}

fn invalid(details: &str) -> FapError {
    FapError::InvalidConfig {
        details: details.to_string(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| FapError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, FapError, StoreBackend};
    use std::collections::HashMap;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, env: &HashMap<String, String>) -> crate::core::errors::Result<()> {
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.policy.prod_mode_window_secs, 30);
        assert_eq!(cfg.schedule.interval_secs, 21_600);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn seed_defaults_match_policy_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.policy.seed.to_policy(), crate::policy::evaluator::PolicyConfig::default());
    }

    #[test]
    fn toml_sections_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[store]
backend = "memory"

[policy]
prod_mode_window_secs = 90

[policy.seed]
max_autonomous_risk_level = 12.5
auto_execute_types = ["resize"]

[schedule]
interval_secs = 600
"#,
        )
        .unwrap();

        let cfg = Config::load_with(Some(&path), |_| None).unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.policy.prod_mode_window_secs, 90);
        assert!((cfg.policy.seed.max_autonomous_risk_level - 12.5).abs() < f64::EPSILON);
        assert_eq!(cfg.policy.seed.auto_execute_types, vec!["resize"]);
        assert_eq!(cfg.schedule.interval_secs, 600);
        assert_eq!(cfg.schedule.max_candidates_per_pass, 100);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let env = vars(&[
            ("FAP_STORE_BACKEND", "Memory"),
            ("FAP_PROD_MODE_WINDOW_SECS", "45"),
            ("FAP_SEED_AUTO_EXECUTE_TYPES", "resize, delete-snapshot,"),
            ("FAP_SCHEDULE_MAX_CANDIDATES", "7"),
            ("FAP_AUDIT_ENABLED", "false"),
        ]);
        apply(&mut cfg, &env).unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.policy.prod_mode_window_secs, 45);
        assert_eq!(cfg.policy.seed.auto_execute_types, vec!["resize", "delete-snapshot"]);
        assert_eq!(cfg.schedule.max_candidates_per_pass, 7);
        assert!(!cfg.audit.enabled);
    }

    #[test]
    fn env_parse_errors_name_the_variable() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &vars(&[("FAP_SCHEDULE_INTERVAL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, FapError::ConfigParse { .. }));
        assert!(err.to_string().contains("FAP_SCHEDULE_INTERVAL_SECS"));

        let err = apply(&mut cfg, &vars(&[("FAP_STORE_BACKEND", "postgres")])).unwrap_err();
        assert_eq!(err.code(), "FAP-1003");
    }

    #[test]
    fn zero_window_rejected() {
        let mut cfg = Config::default();
        cfg.policy.prod_mode_window_secs = 0;
        assert!(matches!(cfg.validate(), Err(FapError::InvalidConfig { .. })));
    }

    #[test]
    fn out_of_range_seed_rejected() {
        let mut cfg = Config::default();
        cfg.policy.seed.max_autonomous_risk_level = 101.0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("policy.seed"));
    }

    #[test]
    fn tick_longer_than_interval_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.interval_secs = 1;
        cfg.schedule.tick_ms = 5_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn huge_interval_validates_without_overflow() {
        let mut cfg = Config::default();
        cfg.schedule.interval_secs = u64::MAX;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stable_hash_tracks_content() {
        let cfg = Config::default();
        let a = cfg.stable_hash().unwrap();
        assert_eq!(a, cfg.stable_hash().unwrap());
        assert_eq!(a.len(), 64);

        let mut changed = cfg;
        changed.schedule.interval_secs += 1;
        assert_ne!(a, changed.stable_hash().unwrap());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/fap/config.toml"))).unwrap_err();
        assert!(matches!(err, FapError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[schedule\ninterval_secs = ").unwrap();
        let err = Config::load_with(Some(&path), |_| None).unwrap_err();
        assert_eq!(err.code(), "FAP-1003");
    }
}
