//! Task manager configuration.

use serde::{Deserialize, Serialize};
use taskmill_store::Interval;

use crate::TaskManagerError;

/// Default number of concurrently running tasks.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default attempts before a failing task becomes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default store namespace.
pub const DEFAULT_INDEX: &str = ".taskmill";

/// Configuration for a [`TaskManager`](crate::TaskManager).
///
/// Durations are written as intervals (`"3s"`, `"5m"`), so the whole struct
/// can be loaded from a JSON file. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Unique id of this scheduler instance. Required.
    pub node_id: Option<String>,
    /// Maximum tasks running at once on this instance.
    pub max_workers: usize,
    /// Time between claim attempts.
    pub poll_interval: Interval,
    /// Attempts before a task is marked failed, unless its definition overrides it.
    pub max_attempts: u32,
    /// Store namespace tasks are kept in.
    pub index: String,
    /// Delay before the first retry of a failed task.
    pub retry_base: Interval,
    /// Upper bound on the retry delay.
    pub retry_max: Interval,
    /// How long a claim holds a task before it must be marked running.
    pub claim_ownership: Interval,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval: Interval::seconds(3),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            index: DEFAULT_INDEX.to_string(),
            retry_base: Interval::minutes(5),
            retry_max: Interval::hours(1),
            claim_ownership: Interval::seconds(30),
        }
    }
}

impl TaskManagerConfig {
    /// Default configuration for the given node.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Interval) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_retry_delays(mut self, base: Interval, max: Interval) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    pub fn with_claim_ownership(mut self, claim_ownership: Interval) -> Self {
        self.claim_ownership = claim_ownership;
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, TaskManagerError> {
        serde_json::from_str(json).map_err(|e| TaskManagerError::InvalidConfig(e.to_string()))
    }

    /// Check the configuration and return the node id.
    pub fn validate(&self) -> Result<&str, TaskManagerError> {
        let node_id = self
            .node_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(TaskManagerError::MissingNodeId)?;

        if self.max_workers == 0 {
            return Err(TaskManagerError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(TaskManagerError::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.claim_ownership.is_zero() {
            return Err(TaskManagerError::InvalidConfig(
                "claim_ownership must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TaskManagerError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_base.as_millis() > self.retry_max.as_millis() {
            return Err(TaskManagerError::InvalidConfig(format!(
                "retry_base ({}) exceeds retry_max ({})",
                self.retry_base, self.retry_max
            )));
        }

        Ok(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_node_id_is_rejected() {
        let config = TaskManagerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(TaskManagerError::MissingNodeId)
        ));

        let blank = TaskManagerConfig::new("   ");
        assert!(matches!(
            blank.validate(),
            Err(TaskManagerError::MissingNodeId)
        ));
    }

    #[test]
    fn test_validate_returns_trimmed_node_id() {
        let config = TaskManagerConfig::new(" node-1 ");
        assert_eq!(config.validate().unwrap(), "node-1");
    }

    #[test]
    fn test_zero_claim_ownership_rejected() {
        let config = TaskManagerConfig::new("node-1").with_claim_ownership(Interval::seconds(0));
        assert!(matches!(
            config.validate(),
            Err(TaskManagerError::InvalidConfig(message)) if message.contains("claim_ownership")
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = TaskManagerConfig::new("node-1").with_max_workers(0);
        assert!(matches!(
            config.validate(),
            Err(TaskManagerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_retry_base_above_max_rejected() {
        let config = TaskManagerConfig::new("node-1")
            .with_retry_delays(Interval::hours(2), Interval::hours(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = TaskManagerConfig::from_json(
            r#"{"node_id": "node-7", "max_workers": 4, "poll_interval": "500ms"}"#,
        )
        .unwrap();

        assert_eq!(config.node_id.as_deref(), Some("node-7"));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.poll_interval, Interval::millis(500));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.index, DEFAULT_INDEX);
    }

    #[test]
    fn test_from_json_rejects_bad_interval() {
        let err = TaskManagerConfig::from_json(r#"{"poll_interval": "often"}"#).unwrap_err();
        assert!(matches!(err, TaskManagerError::InvalidConfig(_)));
    }
}
