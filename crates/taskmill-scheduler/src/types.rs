//! Scheduler types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmill_store::{Interval, TaskDocument};

use crate::TaskManagerError;

/// A task to be scheduled.
///
/// Only `task_type` is required. A missing `id` is generated on save and a
/// missing `run_at` means "as soon as possible".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval: Option<Interval>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: None,
            task_type: task_type.into(),
            params: serde_json::Value::Null,
            state: serde_json::Value::Null,
            run_at: None,
            interval: None,
            scope: Vec::new(),
            user: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Repeat every `interval`, given as a string such as `"5m"`.
    pub fn every(self, interval: &str) -> Result<Self, TaskManagerError> {
        Ok(self.with_interval(interval.parse()?))
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope.push(scope.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Build the idle document to persist for this request.
    pub fn into_document(self, now: DateTime<Utc>) -> TaskDocument {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut doc = TaskDocument::new(id, self.task_type, now);
        doc.params = self.params;
        doc.state = self.state;
        doc.run_at = self.run_at.unwrap_or(now);
        doc.interval = self.interval;
        doc.scope = self.scope;
        doc.user = self.user;
        doc
    }
}

/// Point-in-time counters for a task manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Whether `start()` has been called.
    pub started: bool,
    /// Requests waiting for `start()`.
    pub queued_requests: usize,
    /// Tasks currently occupying a worker slot.
    pub active_workers: usize,
    /// Size of the worker pool.
    pub max_workers: usize,
    /// Tasks claimed since start.
    pub total_claimed: u64,
    /// Runs that completed successfully.
    pub total_succeeded: u64,
    /// Failed runs that were scheduled for a retry.
    pub total_retried: u64,
    /// Tasks that exhausted their attempts.
    pub total_failed: u64,
}

/// `start + delta`, saturating at the end of time.
pub(crate) fn offset(start: DateTime<Utc>, delta: chrono::Duration) -> DateTime<Utc> {
    start
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
