//! Actionflow Engine
//!
//! Runs user-defined record automations inside a workspace.
//!
//! This crate provides:
//! - Trigger matching for data-change, manual and scheduled events
//! - Condition evaluation over record data
//! - `{{path}}` interpolation across steps
//! - A step interpreter with condition and loop control flow
//! - Execution lifecycle tracking with a durable step trace
//! - SSRF-guarded webhooks and a tool registry for external calls

pub mod audit;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod json;
pub mod lifecycle;
pub mod model;
pub mod result_ext;
pub mod schedule;
pub mod security;
pub mod store;
pub mod template;
pub mod tools;
pub mod trigger;
pub mod validate;
pub mod webhook;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{ActionError, EngineError, LifecycleError, StoreError};
pub use lifecycle::{ExecutionLifecycle, TriggerContext};
pub use model::{Action, ExecutionReport, ExecutionStatus, Step, StepResult, TriggerType};
pub use store::{MemoryStore, RecordStore, SeedData};
pub use trigger::TriggerEvent;
pub use validate::{validate_action, ValidationIssue};
