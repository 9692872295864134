#![forbid(unsafe_code)]

//! FinOps autopilot (fap): decides whether a cost-optimization recommendation
//! may run without a human in the loop.
//!
//! Three pieces cooperate:
//! 1. **Policy evaluator**: kill-switch, risk ceiling, savings cap, type allow-list
//! 2. **Mode controller**: autonomous, simulation, and self-expiring prod mode
//! 3. **Settings cache**: one bulk load, invalidated on every store write
//!
//! # Library usage
//!
//! ```rust,no_run
//! use finops_autopilot::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use finops_autopilot::policy::evaluator::{PolicyConfig, RecommendationCandidate};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod engine;
pub mod logger;
pub mod policy;
pub mod store;
