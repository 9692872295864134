//! Autonomous-execution policy: eligibility rules, mode flags, and the
//! settings cache they read from.

pub mod cache;
pub mod evaluator;
pub mod keys;
pub mod modes;
pub mod settings;
