//! Error types for the scheduler.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in task manager operations.
#[derive(Debug, Error)]
pub enum TaskManagerError {
    /// No node id was configured for this instance.
    #[error("task manager is unable to start as no valid node id is assigned to it")]
    MissingNodeId,

    /// Invalid scheduler configuration.
    #[error("invalid task manager configuration: {0}")]
    InvalidConfig(String),

    /// Middleware registered after `start()`.
    #[error("cannot add middleware after the task manager is initialized")]
    MiddlewareAfterStart,

    /// Task definitions registered after `start()`.
    #[error("cannot register task definitions after the task manager is initialized")]
    DefinitionsAfterStart,

    /// Two definitions share a task type.
    #[error("task type already registered: {0}")]
    DuplicateTaskType(String),

    /// A task references a type with no registered definition.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// A task request is malformed.
    #[error("invalid task request: {0}")]
    InvalidRequest(String),

    /// An interval string could not be parsed.
    #[error(transparent)]
    InvalidInterval(#[from] taskmill_store::InvalidInterval),

    /// A middleware stage rejected the task.
    #[error("middleware rejected task: {0}")]
    Middleware(String),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] taskmill_store::StoreError),

    /// A queued request was dropped before it could be executed.
    #[error("queued request was dropped before the task manager started")]
    QueueClosed,
}

impl TaskManagerError {
    /// Whether this is a configuration error, fatal at the call site.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TaskManagerError::MissingNodeId
                | TaskManagerError::InvalidConfig(_)
                | TaskManagerError::MiddlewareAfterStart
                | TaskManagerError::DefinitionsAfterStart
                | TaskManagerError::DuplicateTaskType(_)
        )
    }
}

/// Why a single run of a task counted as a failed attempt.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// A `before_run` middleware rejected the task.
    #[error("before_run middleware failed: {0}")]
    Middleware(String),

    /// The runner returned an error.
    #[error("runner failed: {0}")]
    Runner(String),

    /// The runner did not finish within its definition's timeout.
    #[error("runner timed out after {0:?}")]
    TimedOut(Duration),
}
