//! One optimization pass: read pending recommendations, decide, dispatch.
//!
//! Policy and mode flags are snapshotted once at the start of the pass so every
//! candidate in it is judged by the same rules. A bad candidate or a failed
//! dispatch is recorded and the pass moves on; only a failure to read the
//! policy or the source aborts it.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FapError, Result};
use crate::logger::audit::{AuditEvent, AuditHandle};
use crate::policy::evaluator::{self, RecommendationCandidate, Veto};
use crate::policy::modes::{AUTO_REVERT_ACTOR, AnalysisMethod, ModeController};
use crate::policy::settings::AgentSettings;

/// Lifecycle state of a stored recommendation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    #[default]
    Pending,
    AwaitingApproval,
    Executed,
    Dismissed,
}

/// A recommendation as exported by the recommendation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRecord {
    pub id: String,
    pub resource_id: String,
    #[serde(rename = "type")]
    pub rec_type: String,
    pub risk_level: f64,
    /// Annual savings scaled by 1000.
    pub projected_annual_savings: i64,
    #[serde(default)]
    pub status: RecommendationStatus,
}

impl RecommendationRecord {
    /// The fields the policy looks at.
    #[must_use]
    pub fn candidate(&self) -> RecommendationCandidate {
        RecommendationCandidate::new(
            self.rec_type.clone(),
            self.risk_level,
            self.projected_annual_savings,
        )
    }
}

/// Where pending recommendations come from.
pub trait RecommendationSource: Send + Sync {
    /// Recommendations still awaiting a decision.
    fn pending(&self) -> Result<Vec<RecommendationRecord>>;
}

/// Reads a JSON array of [`RecommendationRecord`]s from disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecommendationSource for JsonFileSource {
    fn pending(&self) -> Result<Vec<RecommendationRecord>> {
        let raw = fs::read_to_string(&self.path).map_err(|e| FapError::io(&self.path, e))?;
        let records: Vec<RecommendationRecord> = serde_json::from_str(&raw)?;
        Ok(records
            .into_iter()
            .filter(|r| r.status == RecommendationStatus::Pending)
            .collect())
    }
}

/// Hands decided recommendations to the outside world.
pub trait Dispatcher: Send + Sync {
    /// Apply the recommendation without human review.
    fn execute(&self, record: &RecommendationRecord, analysis: AnalysisMethod) -> Result<()>;

    /// Route the recommendation to a human, with the reasons it was held back.
    fn request_approval(&self, record: &RecommendationRecord, vetoes: &[Veto]) -> Result<()>;
}

/// Dispatcher that only reports decisions on stderr. Used by `fap run` when no
/// executor is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportingDispatcher;

impl Dispatcher for ReportingDispatcher {
    fn execute(&self, record: &RecommendationRecord, analysis: AnalysisMethod) -> Result<()> {
        eprintln!(
            "[FAP-DISPATCH] execute {} ({} on {}, analysis={analysis})",
            record.id, record.rec_type, record.resource_id
        );
        Ok(())
    }

    fn request_approval(&self, record: &RecommendationRecord, vetoes: &[Veto]) -> Result<()> {
        let reasons: Vec<String> = vetoes.iter().map(ToString::to_string).collect();
        eprintln!(
            "[FAP-DISPATCH] approval needed for {}: {}",
            record.id,
            reasons.join("; ")
        );
        Ok(())
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Executed,
    Simulated,
    ApprovalRequested,
    Rejected,
    Failed,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Executed => "executed",
            Self::Simulated => "simulated",
            Self::ApprovalRequested => "approval_requested",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOutcome {
    pub id: String,
    pub rec_type: String,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vetoes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub analysis: AnalysisMethod,
    pub simulation: bool,
    pub prod_mode_reverted: bool,
    pub outcomes: Vec<CandidateOutcome>,
    /// Pending records left for the next pass by the per-pass cap.
    pub deferred: usize,
    pub duration_ms: u64,
}

impl PassReport {
    #[must_use]
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.disposition == disposition)
            .count()
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "executed={} simulated={} approval_requested={} rejected={} failed={} deferred={}",
            self.count(Disposition::Executed),
            self.count(Disposition::Simulated),
            self.count(Disposition::ApprovalRequested),
            self.count(Disposition::Rejected),
            self.count(Disposition::Failed),
            self.deferred,
        )
    }
}

/// Runs passes against shared settings and modes.
pub struct OptimizationPass {
    settings: Arc<AgentSettings>,
    modes: Arc<ModeController>,
    audit: Option<AuditHandle>,
    max_candidates: usize,
}

impl OptimizationPass {
    #[must_use]
    pub fn new(
        settings: Arc<AgentSettings>,
        modes: Arc<ModeController>,
        audit: Option<AuditHandle>,
        max_candidates: usize,
    ) -> Self {
        Self {
            settings,
            modes,
            audit,
            max_candidates,
        }
    }

    /// Run one pass.
    pub fn run(
        &self,
        source: &dyn RecommendationSource,
        dispatcher: &dyn Dispatcher,
    ) -> Result<PassReport> {
        let started = Instant::now();

        let prod_mode_reverted = self.modes.revert_expired_prod_mode(AUTO_REVERT_ACTOR)?;
        if prod_mode_reverted {
            self.emit(AuditEvent::ProdModeExpired {
                actor: AUTO_REVERT_ACTOR.to_string(),
            });
        }

        let policy = self.settings.policy_config().inspect_err(|e| self.emit_error(e))?;
        let modes = self.modes.mode_state()?;
        let analysis = modes.analysis_method();

        let mut pending = source.pending().inspect_err(|e| self.emit_error(e))?;
        let deferred = pending.len().saturating_sub(self.max_candidates);
        pending.truncate(self.max_candidates);
        self.emit(AuditEvent::PassStarted {
            candidates: pending.len(),
        });

        let mut outcomes = Vec::with_capacity(pending.len());
        for record in &pending {
            let outcome = match evaluator::evaluate(&record.candidate(), &policy) {
                Err(err) => CandidateOutcome {
                    id: record.id.clone(),
                    rec_type: record.rec_type.clone(),
                    disposition: Disposition::Rejected,
                    vetoes: Vec::new(),
                    error: Some(err.to_string()),
                },
                Ok(result) => {
                    let dispatched = if !result.eligible {
                        dispatcher
                            .request_approval(record, &result.vetoes)
                            .map(|()| Disposition::ApprovalRequested)
                    } else if modes.simulation_mode_enabled {
                        Ok(Disposition::Simulated)
                    } else {
                        dispatcher
                            .execute(record, analysis)
                            .map(|()| Disposition::Executed)
                    };
                    let (disposition, error) = match dispatched {
                        Ok(d) => (d, None),
                        Err(e) => {
                            eprintln!("[FAP-PASS] dispatch failed for {}: {e}", record.id);
                            (Disposition::Failed, Some(e.to_string()))
                        }
                    };
                    CandidateOutcome {
                        id: record.id.clone(),
                        rec_type: record.rec_type.clone(),
                        disposition,
                        vetoes: result.vetoes.iter().map(ToString::to_string).collect(),
                        error,
                    }
                }
            };

            self.emit(AuditEvent::RecommendationEvaluated {
                id: outcome.id.clone(),
                rec_type: outcome.rec_type.clone(),
                eligible: matches!(
                    outcome.disposition,
                    Disposition::Executed | Disposition::Simulated
                ),
                vetoes: outcome.vetoes.clone(),
                disposition: outcome.disposition.to_string(),
                analysis: analysis.to_string(),
            });
            outcomes.push(outcome);
        }

        let report = PassReport {
            analysis,
            simulation: modes.simulation_mode_enabled,
            prod_mode_reverted,
            outcomes,
            deferred,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        self.emit(AuditEvent::PassCompleted {
            summary: report.summary(),
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.send(event);
        }
    }

    fn emit_error(&self, err: &FapError) {
        if let Some(audit) = &self.audit {
            audit.error(err);
        }
    }
}
