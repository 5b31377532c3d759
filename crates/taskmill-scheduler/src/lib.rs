//! Polling task scheduler for taskmill.
//!
//! This crate provides a persistent scheduler that:
//! - Claims due tasks from a shared [`TaskStore`](taskmill_store::TaskStore)
//!   without ever handing one task to two instances
//! - Runs at most `max_workers` tasks at a time
//! - Buffers schedule/remove/fetch calls made before `start()`
//! - Passes tasks through middleware before saving and before running
//! - Retries failures with exponential backoff and reschedules recurring tasks

mod config;
mod definition;
mod error;
mod manager;
mod middleware;
mod operations;
mod poller;
mod pool;
mod queue;
mod retry;
mod types;

pub use config::TaskManagerConfig;
pub use definition::{
    RunResult, RunnerFactory, TaskDefinition, TaskDefinitionRegistry, TaskRunError, TaskRunner,
};
pub use error::{RunFailure, TaskManagerError};
pub use manager::TaskManager;
pub use middleware::{Middleware, MiddlewareChain, MiddlewareError, RunContext, SaveContext};
pub use poller::{TaskPoller, TickOutcome, claim_available_tasks};
pub use pool::{TaskOutcome, TaskPool};
pub use retry::RetryPolicy;
pub use types::{ManagerStats, TaskRequest};

pub use taskmill_store::{
    FetchQuery, FetchResult, FetchSort, Interval, SearchAfter, TaskDocument, TaskStatus,
    TaskStore,
};
