//! Error types for action execution.

use std::time::Duration;

use thiserror::Error;

use crate::store::Table;

/// Error raised while interpreting a single step.
///
/// A step that fails with one of these is recorded as a failed
/// `StepResult`; only fatal errors (see [`ActionError::is_fatal`]) escape
/// the interpreter.
#[derive(Error, Debug)]
pub enum ActionError {
    /// Invalid step configuration or input data.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An outbound call (webhook, tool) failed or was refused.
    #[error("External call failed: {0}")]
    ExternalCall(String),

    /// Record store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Loop nesting went deeper than the engine allows.
    #[error("Loop nesting exceeded: depth {depth} is above the maximum of {max}")]
    LoopNestingExceeded { depth: usize, max: usize },

    /// Loop asked for more iterations than the engine allows.
    #[error("Iteration limit exceeded: maxIterations {requested} is above the limit of {limit}")]
    IterationLimitExceeded { requested: u64, limit: u64 },

    /// A step inside a condition branch failed.
    #[error("Branch step '{step_id}' failed: {message}")]
    BranchFailed { step_id: String, message: String },

    /// A step inside a loop body failed; the remaining iterations were skipped.
    #[error("Loop iteration {index} failed at step '{step_id}': {message}")]
    IterationFailed {
        index: usize,
        step_id: String,
        message: String,
    },

    /// Unexpected engine failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an external call error.
    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalCall(msg.into())
    }

    /// Stable category label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ExternalCall(_) => "external_call",
            Self::Store(_) => "store",
            Self::LoopNestingExceeded { .. } | Self::IterationLimitExceeded { .. } => {
                "limit_exceeded"
            }
            Self::BranchFailed { .. } | Self::IterationFailed { .. } => "nested_step",
            Self::Internal(_) => "internal",
        }
    }

    /// Fatal errors abort the whole run instead of failing one step.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(e) => e.is_fatal(),
            Self::Internal(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalCall(err.to_string())
    }
}

/// Error raised by a [`RecordStore`](crate::store::RecordStore).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{table} document not found: {id}")]
    NotFound { table: Table, id: String },

    #[error("{table} document {id} belongs to another workspace")]
    WrongWorkspace { table: Table, id: String },

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(table: Table, id: impl Into<String>) -> Self {
        Self::NotFound {
            table,
            id: id.into(),
        }
    }

    pub fn wrong_workspace(table: Table, id: impl Into<String>) -> Self {
        Self::WrongWorkspace {
            table,
            id: id.into(),
        }
    }

    /// Connectivity and data-corruption errors are not recoverable per step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Serialization(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised by the execution lifecycle manager.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution {id} is already {status}")]
    AlreadyTerminal { id: String, status: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned by the [`Engine`](crate::engine::Engine) entry points.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Action {0} belongs to another workspace")]
    WrongWorkspace(String),

    #[error("Action {0} is not active")]
    ActionInactive(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Result type for step execution.
pub type ActionResult<T> = std::result::Result<T, ActionError>;
