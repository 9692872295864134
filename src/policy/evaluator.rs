//! Autonomous-execution eligibility: a pure, default-deny rule check.
//!
//! A recommendation may skip human approval only when every gate passes:
//! the global autonomous switch is on, its risk is at or below the ceiling,
//! its projected savings are at or below the approval cap, and its type is
//! allow-listed. Any single failing gate vetoes; there is no weighting.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FapError, Result};
use crate::policy::keys::defaults;

/// Upper bound of the risk scale.
pub const MAX_RISK_LEVEL: f64 = 100.0;

// ──────────────────── policy config ────────────────────

/// Thresholds governing autonomous execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Global kill-switch; when off every recommendation needs approval.
    pub autonomous_mode_enabled: bool,
    /// Highest risk level (0-100) still eligible.
    pub max_autonomous_risk_level: f64,
    /// Savings cap in thousandths of a currency unit.
    pub approval_required_above_savings: i64,
    /// Recommendation types allowed to run unattended.
    pub auto_execute_types: BTreeSet<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            autonomous_mode_enabled: defaults::AUTONOMOUS_MODE,
            max_autonomous_risk_level: defaults::MAX_AUTONOMOUS_RISK_LEVEL,
            approval_required_above_savings: defaults::APPROVAL_REQUIRED_ABOVE_SAVINGS,
            auto_execute_types: defaults::AUTO_EXECUTE_TYPES
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
        }
    }
}

impl PolicyConfig {
    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        validate_risk_level("max_autonomous_risk_level", self.max_autonomous_risk_level)?;
        validate_savings(
            "approval_required_above_savings",
            self.approval_required_above_savings,
        )?;
        Ok(())
    }
}

pub(crate) fn validate_risk_level(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(FapError::validation(field, format!("must be finite, got {value}")));
    }
    if !(0.0..=MAX_RISK_LEVEL).contains(&value) {
        return Err(FapError::validation(
            field,
            format!("must be in [0, {MAX_RISK_LEVEL}], got {value}"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_savings(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(FapError::validation(field, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

// ──────────────────── candidate ────────────────────

/// The three fields of a stored recommendation the evaluator looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationCandidate {
    /// Recommendation category tag, e.g. `resize`.
    #[serde(rename = "type")]
    pub rec_type: String,
    /// Estimated chance of negative impact, 0-100.
    pub risk_level: f64,
    /// Projected annual savings in thousandths of a currency unit.
    pub projected_annual_savings: i64,
}

impl RecommendationCandidate {
    #[must_use]
    pub fn new(rec_type: impl Into<String>, risk_level: f64, projected_annual_savings: i64) -> Self {
        Self {
            rec_type: rec_type.into(),
            risk_level,
            projected_annual_savings,
        }
    }

    /// Reject malformed input before it reaches the evaluator.
    pub fn validate(&self) -> Result<()> {
        if self.rec_type.trim().is_empty() {
            return Err(FapError::validation("type", "must not be empty"));
        }
        validate_risk_level("riskLevel", self.risk_level)?;
        validate_savings("projectedAnnualSavings", self.projected_annual_savings)?;
        Ok(())
    }
}

// ──────────────────── evaluation ────────────────────

/// Why a candidate was routed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Veto {
    /// Global autonomous switch is off.
    AutonomousModeDisabled,
    /// Risk above the configured ceiling.
    RiskAboveThreshold { risk_level: f64, max: f64 },
    /// Savings above the approval cap.
    SavingsAboveThreshold { savings: i64, cap: i64 },
    /// Type not on the allow-list.
    TypeNotAllowed { rec_type: String },
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutonomousModeDisabled => write!(f, "autonomous mode disabled"),
            Self::RiskAboveThreshold { risk_level, max } => {
                write!(f, "risk {risk_level} above max {max}")
            }
            Self::SavingsAboveThreshold { savings, cap } => {
                write!(f, "savings {savings} above approval cap {cap}")
            }
            Self::TypeNotAllowed { rec_type } => write!(f, "type {rec_type:?} not auto-executable"),
        }
    }
}

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub eligible: bool,
    /// Failing gates in check order; empty iff `eligible`.
    pub vetoes: Vec<Veto>,
}

/// Whether `candidate` may execute without human approval.
///
/// Pure: identical inputs always yield the same answer. Callers are expected
/// to have run [`RecommendationCandidate::validate`] first.
#[must_use]
pub fn can_execute_autonomously(candidate: &RecommendationCandidate, config: &PolicyConfig) -> bool {
    if !config.autonomous_mode_enabled {
        return false;
    }
    if candidate.risk_level > config.max_autonomous_risk_level {
        return false;
    }
    if candidate.projected_annual_savings > config.approval_required_above_savings {
        return false;
    }
    config.auto_execute_types.contains(&candidate.rec_type)
}

/// Validate and evaluate, collecting every veto.
///
/// The kill-switch short-circuits: with autonomous mode off the only veto
/// reported is [`Veto::AutonomousModeDisabled`].
pub fn evaluate(candidate: &RecommendationCandidate, config: &PolicyConfig) -> Result<EvaluationResult> {
    candidate.validate()?;

    if !config.autonomous_mode_enabled {
        return Ok(EvaluationResult {
            eligible: false,
            vetoes: vec![Veto::AutonomousModeDisabled],
        });
    }

    let mut vetoes = Vec::new();
    if candidate.risk_level > config.max_autonomous_risk_level {
        vetoes.push(Veto::RiskAboveThreshold {
            risk_level: candidate.risk_level,
            max: config.max_autonomous_risk_level,
        });
    }
    if candidate.projected_annual_savings > config.approval_required_above_savings {
        vetoes.push(Veto::SavingsAboveThreshold {
            savings: candidate.projected_annual_savings,
            cap: config.approval_required_above_savings,
        });
    }
    if !config.auto_execute_types.contains(&candidate.rec_type) {
        vetoes.push(Veto::TypeNotAllowed {
            rec_type: candidate.rec_type.clone(),
        });
    }

    let eligible = vetoes.is_empty();
    debug_assert_eq!(eligible, can_execute_autonomously(candidate, config));
    Ok(EvaluationResult { eligible, vetoes })
}
