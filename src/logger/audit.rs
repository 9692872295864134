//! Background audit writer.
//!
//! One thread owns the [`JsonlWriter`]. Everything else sends [`AuditEvent`]s
//! over a bounded crossbeam channel with `try_send`, so a slow disk never
//! stalls a policy decision; overflow is counted and reported on the next
//! line that makes it through.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{FapError, Result};
use crate::logger::jsonl::{AuditEntry, EventType, JsonlConfig, JsonlWriter, Severity};
use crate::store::{ConfigEntry, StoreObserver};

/// Default bounded channel capacity.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded in the audit trail.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    ConfigWritten {
        key: String,
        value: String,
        actor: Option<String>,
    },
    ProdModeExpired {
        actor: String,
    },
    RecommendationEvaluated {
        id: String,
        rec_type: String,
        eligible: bool,
        vetoes: Vec<String>,
        disposition: String,
        analysis: String,
    },
    PassStarted {
        candidates: usize,
    },
    PassCompleted {
        summary: String,
        duration_ms: u64,
    },
    SchedulerStarted {
        config_hash: String,
    },
    SchedulerStopped {
        reason: String,
        passes: u64,
    },
    CacheInvalidated {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the writer thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable sender side of the audit trail.
#[derive(Clone)]
pub struct AuditHandle {
    tx: Sender<AuditEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl AuditHandle {
    /// Queue an event. Never blocks; a full channel drops the event.
    pub fn send(&self, event: AuditEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped to back-pressure and not yet reported.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the writer thread to drain and exit.
    pub fn shutdown(&self) {
        if self.tx.send(AuditEvent::Shutdown).is_err() {
            eprintln!("[FAP-AUDIT] shutdown requested but audit writer already stopped");
        }
    }

    /// Report a crate error with its stable code.
    pub fn error(&self, err: &FapError) {
        self.send(AuditEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

/// Every committed store write becomes a `config_write` line, including
/// writes that never went through the typed setters.
impl StoreObserver for AuditHandle {
    fn on_write(&self, entry: &ConfigEntry) {
        self.send(AuditEvent::ConfigWritten {
            key: entry.key.clone(),
            value: entry.value.clone(),
            actor: entry.updated_by.clone(),
        });
    }
}

/// Spawn the audit writer thread.
pub fn spawn_audit_logger(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(AuditHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<AuditEvent>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = AuditHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("fap-audit".to_string())
        .spawn(move || writer_thread_main(&rx, config, &dropped))
        .map_err(|e| FapError::Runtime {
            details: format!("failed to spawn audit thread: {e}"),
        })?;

    Ok((handle, join))
}

fn writer_thread_main(rx: &Receiver<AuditEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = AuditEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} audit events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, AuditEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&to_entry(&event));
        if rx.is_empty() {
            jsonl.flush();
        }
    }

    jsonl.flush();
    jsonl.sync();
}

fn to_entry(event: &AuditEvent) -> AuditEntry {
    match event {
        AuditEvent::ConfigWritten { key, value, actor } => {
            let mut e = AuditEntry::new(EventType::ConfigWrite, Severity::Info);
            e.key = Some(key.clone());
            e.value = Some(value.clone());
            e.actor.clone_from(actor);
            e
        }
        AuditEvent::ProdModeExpired { actor } => {
            let mut e = AuditEntry::new(EventType::ProdModeExpired, Severity::Info);
            e.actor = Some(actor.clone());
            e
        }
        AuditEvent::RecommendationEvaluated {
            id,
            rec_type,
            eligible,
            vetoes,
            disposition,
            analysis,
        } => {
            let severity = if disposition == "failed" {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = AuditEntry::new(EventType::RecommendationEvaluated, severity);
            e.recommendation_id = Some(id.clone());
            e.rec_type = Some(rec_type.clone());
            e.eligible = Some(*eligible);
            e.vetoes.clone_from(vetoes);
            e.disposition = Some(disposition.clone());
            e.analysis = Some(analysis.clone());
            e
        }
        AuditEvent::PassStarted { candidates } => {
            let mut e = AuditEntry::new(EventType::PassStarted, Severity::Info);
            e.details = Some(format!("candidates={candidates}"));
            e
        }
        AuditEvent::PassCompleted {
            summary,
            duration_ms,
        } => {
            let mut e = AuditEntry::new(EventType::PassCompleted, Severity::Info);
            e.details = Some(summary.clone());
            e.duration_ms = Some(*duration_ms);
            e
        }
        AuditEvent::SchedulerStarted { config_hash } => {
            let mut e = AuditEntry::new(EventType::SchedulerStart, Severity::Info);
            e.details = Some(format!(
                "version={} config_hash={config_hash}",
                env!("CARGO_PKG_VERSION")
            ));
            e
        }
        AuditEvent::SchedulerStopped { reason, passes } => {
            let mut e = AuditEntry::new(EventType::SchedulerStop, Severity::Info);
            e.details = Some(format!("reason={reason} passes={passes}"));
            e
        }
        AuditEvent::CacheInvalidated { reason } => {
            let mut e = AuditEntry::new(EventType::CacheInvalidated, Severity::Info);
            e.details = Some(reason.clone());
            e
        }
        AuditEvent::Error { code, message } => {
            let mut e = AuditEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        AuditEvent::Shutdown => AuditEntry::new(EventType::SchedulerStop, Severity::Info),
    }
}
