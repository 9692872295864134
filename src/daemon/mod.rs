//! Scheduled execution: the optimization pass, its loop, and signal flags.

pub mod job;
pub mod scheduler;
pub mod signals;
