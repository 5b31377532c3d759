//! Task definitions and the registry that maps task types to runners.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{RunContext, TaskManagerError};

/// Default runner timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Error returned by a runner.
pub type TaskRunError = Box<dyn std::error::Error + Send + Sync>;

/// Successful outcome of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    /// New runner state to persist. `None` keeps the previous state.
    pub state: Option<serde_json::Value>,
    /// Explicit next run. Takes precedence over the task's interval.
    pub run_at: Option<DateTime<Utc>>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }
}

/// Executable behaviour for one claimed task.
#[async_trait]
pub trait TaskRunner: Send {
    async fn run(&mut self) -> Result<RunResult, TaskRunError>;
}

/// Builds a runner for a claimed task.
pub type RunnerFactory = Arc<dyn Fn(RunContext) -> Box<dyn TaskRunner> + Send + Sync>;

type BoxRunFuture = Pin<Box<dyn Future<Output = Result<RunResult, TaskRunError>> + Send>>;

/// Runner wrapping a single future, used by [`TaskDefinition::from_fn`].
struct FutureRunner {
    future: Option<BoxRunFuture>,
}

#[async_trait]
impl TaskRunner for FutureRunner {
    async fn run(&mut self) -> Result<RunResult, TaskRunError> {
        match self.future.take() {
            Some(future) => future.await,
            None => Err("runner was already consumed".into()),
        }
    }
}

/// A registered task type.
#[derive(Clone)]
pub struct TaskDefinition {
    pub task_type: String,
    pub title: String,
    pub description: Option<String>,
    /// Overrides the configured default when set.
    pub max_attempts: Option<u32>,
    pub timeout: Duration,
    create_runner: RunnerFactory,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("task_type", &self.task_type)
            .field("title", &self.title)
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TaskDefinition {
    /// Create a definition from a runner factory.
    pub fn new<F>(task_type: impl Into<String>, title: impl Into<String>, create_runner: F) -> Self
    where
        F: Fn(RunContext) -> Box<dyn TaskRunner> + Send + Sync + 'static,
    {
        Self {
            task_type: task_type.into(),
            title: title.into(),
            description: None,
            max_attempts: None,
            timeout: DEFAULT_TIMEOUT,
            create_runner: Arc::new(create_runner),
        }
    }

    /// Create a definition whose runner is a single async function call.
    pub fn from_fn<F, Fut>(task_type: impl Into<String>, title: impl Into<String>, run: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RunResult, TaskRunError>> + Send + 'static,
    {
        Self::new(task_type, title, move |ctx| -> Box<dyn TaskRunner> {
            Box::new(FutureRunner {
                future: Some(Box::pin(run(ctx))),
            })
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn create_runner(&self, ctx: RunContext) -> Box<dyn TaskRunner> {
        (self.create_runner)(ctx)
    }
}

/// Task type → definition lookup.
#[derive(Debug, Clone, Default)]
pub struct TaskDefinitionRegistry {
    definitions: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register definitions. Either all are added or none are.
    pub fn register(
        &mut self,
        definitions: impl IntoIterator<Item = TaskDefinition>,
    ) -> Result<(), TaskManagerError> {
        let mut staged: HashMap<String, Arc<TaskDefinition>> = HashMap::new();
        for definition in definitions {
            let task_type = definition.task_type.clone();
            if self.definitions.contains_key(&task_type) || staged.contains_key(&task_type) {
                return Err(TaskManagerError::DuplicateTaskType(task_type));
            }
            staged.insert(task_type, Arc::new(definition));
        }
        self.definitions.extend(staged);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.definitions.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.definitions.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
