//! Audit trail: append-only JSONL fed by a background writer thread.

pub mod audit;
pub mod jsonl;
