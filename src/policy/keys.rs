//! Persisted setting keys, their defaults, and value codecs.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::errors::{FapError, Result};

pub const AUTONOMOUS_MODE: &str = "agent.autonomous_mode";
pub const MAX_AUTONOMOUS_RISK_LEVEL: &str = "agent.max_autonomous_risk_level";
pub const APPROVAL_REQUIRED_ABOVE_SAVINGS: &str = "agent.approval_required_above_savings";
pub const AUTO_EXECUTE_TYPES: &str = "agent.auto_execute_types";
pub const PROD_MODE: &str = "agent.prod_mode";
pub const PROD_MODE_ACTIVATED_AT: &str = "agent.prod_mode_activated_at";
pub const SIMULATION_MODE: &str = "agent.simulation_mode";

/// Fallback values used whenever a key has never been written.
pub mod defaults {
    pub const AUTONOMOUS_MODE: bool = false;
    pub const MAX_AUTONOMOUS_RISK_LEVEL: f64 = 5.0;
    /// $10,000 in thousandths of a dollar.
    pub const APPROVAL_REQUIRED_ABOVE_SAVINGS: i64 = 10_000_000;
    pub const AUTO_EXECUTE_TYPES: &[&str] = &["resize", "storage-class"];
    pub const PROD_MODE: bool = false;
    pub const SIMULATION_MODE: bool = false;
}

/// Human-readable description stored next to each seeded key.
#[must_use]
pub fn description(key: &str) -> Option<&'static str> {
    match key {
        AUTONOMOUS_MODE => Some("Allow eligible recommendations to execute without approval"),
        MAX_AUTONOMOUS_RISK_LEVEL => Some("Highest risk level (0-100) eligible for autonomous execution"),
        APPROVAL_REQUIRED_ABOVE_SAVINGS => {
            Some("Projected annual savings (x1000) above which a human must approve")
        }
        AUTO_EXECUTE_TYPES => Some("Comma-separated recommendation types allowed to auto-execute"),
        PROD_MODE => Some("AI-assisted analysis toggle; reverts automatically"),
        PROD_MODE_ACTIVATED_AT => Some("Timestamp of the last prod mode activation"),
        SIMULATION_MODE => Some("Evaluate and report without executing changes"),
        _ => None,
    }
}

/// Parse an operator-supplied on/off flag.
pub fn parse_flag(field: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(FapError::validation(
            field,
            format!("expected a boolean, got {raw:?}"),
        )),
    }
}

#[must_use]
pub fn encode_flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Decode a stored flag; corrupt stored values are a configuration error.
pub fn decode_flag(key: &str, raw: &str) -> Result<bool> {
    parse_flag(key, raw).map_err(|_| FapError::InvalidConfig {
        details: format!("{key} holds non-boolean value {raw:?}"),
    })
}

pub fn decode_f64(key: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|error| FapError::InvalidConfig {
            details: format!("{key} holds non-numeric value {raw:?}: {error}"),
        })
}

pub fn decode_i64(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|error| FapError::InvalidConfig {
            details: format!("{key} holds non-integer value {raw:?}: {error}"),
        })
}

/// Split a comma-joined type list, dropping blanks and surrounding whitespace.
#[must_use]
pub fn decode_types(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[must_use]
pub fn encode_types(types: &BTreeSet<String>) -> String {
    types.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

#[must_use]
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|error| FapError::InvalidConfig {
            details: format!("{key} holds invalid timestamp {raw:?}: {error}"),
        })
}
