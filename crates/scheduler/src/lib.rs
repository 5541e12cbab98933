//! Actionflow Scheduler
//!
//! Fires cron-triggered actions on a fixed tick.
//!
//! This crate provides:
//! - Scheduler configuration from the environment
//! - A tick loop over the engine's due-schedule scan

pub mod config;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use scheduler::Scheduler;
