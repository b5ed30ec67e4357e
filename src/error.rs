//! Error types for the job engine.
//!
//! - Configuration errors are returned from [`Engine::new`](crate::Engine::new)
//!   before any workers start.
//! - [`EngineError::UnknownState`] is raised by the dispatcher when an
//!   execution function routes a job to a state that was never registered.

use thiserror::Error;

/// Top-level errors for engine construction and execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("non-terminal state {0} must allow at least one concurrent execution")]
    NonPositiveConcurrency(String),
    #[error("non-terminal state {0} has no exec function")]
    MissingExec(String),
    #[error("duplicate state name: {0}")]
    DuplicateState(String),
    #[error("job {job_id} routed to unregistered state: {state}")]
    UnknownState { job_id: String, state: String },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
