//! Bounded pool of worker slots that run claimed tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use taskmill_store::{StoreError, TaskDocument, TaskStatus, TaskStore};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::{
    ManagerStats, MiddlewareChain, RetryPolicy, RunContext, RunFailure, RunResult,
    TaskDefinition, TaskDefinitionRegistry, TaskManagerConfig,
};
use crate::types::offset;

/// Upper bound on time spent retrying a single write-back.
const WRITE_BACK_MAX_ELAPSED: Duration = Duration::from_secs(30);

/// What happened to a claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran successfully and was put back to run again at `run_at`.
    Rescheduled { run_at: DateTime<Utc> },
    /// Ran successfully once and was removed.
    Completed,
    /// Failed and will be retried at `run_at`.
    Retried { attempts: u32, run_at: DateTime<Utc> },
    /// Failed with no attempts left.
    Failed { attempts: u32 },
    /// Not run or not written back; another instance owns it or will reclaim it.
    Abandoned,
}

/// Store write that ends a run.
#[derive(Debug)]
enum WriteBack {
    Update(TaskDocument),
    Delete(String),
}

#[derive(Debug, Default)]
struct Counters {
    claimed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

/// Worker slots plus everything needed to run a task and record its outcome.
///
/// A slot is a semaphore permit: it is taken when a claimed task is spawned
/// and released only after the task's outcome has been written back.
pub struct TaskPool {
    max_workers: usize,
    permits: Arc<Semaphore>,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskDefinitionRegistry>,
    middleware: Arc<MiddlewareChain>,
    retry: RetryPolicy,
    default_max_attempts: u32,
    /// Grace period added to a runner's timeout before others may reclaim it.
    claim_ownership: chrono::Duration,
    counters: Counters,
}

impl TaskPool {
    pub fn new(
        config: &TaskManagerConfig,
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskDefinitionRegistry>,
        middleware: Arc<MiddlewareChain>,
    ) -> Self {
        Self {
            max_workers: config.max_workers,
            permits: Arc::new(Semaphore::new(config.max_workers)),
            store,
            registry,
            middleware,
            retry: RetryPolicy::from_config(config),
            default_max_attempts: config.max_attempts,
            claim_ownership: config.claim_ownership.to_chrono(),
            counters: Counters::default(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Free worker slots.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Slots currently running a task.
    pub fn active_workers(&self) -> usize {
        self.max_workers.saturating_sub(self.available_workers())
    }

    /// Task types this pool can run.
    pub fn task_types(&self) -> Vec<String> {
        self.registry.task_types()
    }

    pub(crate) fn record_claimed(&self, count: usize) {
        self.counters
            .claimed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            started: true,
            queued_requests: 0,
            active_workers: self.active_workers(),
            max_workers: self.max_workers,
            total_claimed: self.counters.claimed.load(Ordering::Relaxed),
            total_succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            total_retried: self.counters.retried.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Run a claimed task on a free slot in the background.
    ///
    /// Returns `false` without running it if every slot is taken. The task
    /// stays claimed and is picked up again once its ownership expires.
    pub fn spawn(self: &Arc<Self>, task: TaskDocument) -> bool {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(id = %task.id, "no free worker slot for claimed task");
            return false;
        };

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            pool.run_claimed(task).await;
        });
        true
    }

    /// Wait until every slot is free.
    pub async fn drain(&self) {
        let slots = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        match self.permits.acquire_many(slots).await {
            Ok(_all) => debug!("all workers idle"),
            Err(e) => warn!(error = %e, "worker pool closed while draining"),
        }
    }

    /// Run one claimed task to completion and record the outcome.
    #[tracing::instrument(skip(self, task), fields(id = %task.id, task_type = %task.task_type))]
    pub async fn run_claimed(&self, task: TaskDocument) -> TaskOutcome {
        let Some(definition) = self.registry.get(&task.task_type) else {
            let failure =
                RunFailure::Runner(format!("no definition for task type {}", task.task_type));
            let (write, outcome) = self.on_failure(task, self.default_max_attempts, failure);
            return self.finish(write, outcome).await;
        };

        let started_at = Utc::now();
        let running = match self.mark_running(task, &definition, started_at).await {
            Ok(doc) => doc,
            Err(e) if e.is_conflict() => {
                debug!("task was reclaimed before it started");
                return TaskOutcome::Abandoned;
            }
            Err(e) => {
                warn!(error = %e, "failed to mark task as running");
                return TaskOutcome::Abandoned;
            }
        };

        let (write, outcome) = match self.execute(&definition, running.clone()).await {
            Ok(result) => self.on_success(running, result, started_at),
            Err(failure) => {
                let max_attempts = definition.max_attempts.unwrap_or(self.default_max_attempts);
                self.on_failure(running, max_attempts, failure)
            }
        };
        self.finish(write, outcome).await
    }

    /// Write back the outcome and count it.
    async fn finish(&self, write: WriteBack, outcome: TaskOutcome) -> TaskOutcome {
        match self.write_back(write).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                warn!(error = %e, "task was reclaimed while running, dropping outcome");
                return TaskOutcome::Abandoned;
            }
            Err(e) => {
                error!(error = %e, "failed to record task outcome");
                return TaskOutcome::Abandoned;
            }
        }

        let counter = match &outcome {
            TaskOutcome::Rescheduled { .. } | TaskOutcome::Completed => &self.counters.succeeded,
            TaskOutcome::Retried { .. } => &self.counters.retried,
            TaskOutcome::Failed { .. } => &self.counters.failed,
            TaskOutcome::Abandoned => return outcome,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Move a claimed task to running, extending ownership to cover the run.
    async fn mark_running(
        &self,
        mut task: TaskDocument,
        definition: &TaskDefinition,
        started_at: DateTime<Utc>,
    ) -> Result<TaskDocument, StoreError> {
        let timeout = chrono::Duration::from_std(definition.timeout)
            .unwrap_or(chrono::Duration::MAX);
        let deadline = offset(offset(started_at, timeout), self.claim_ownership);

        task.status = TaskStatus::Running;
        task.started_at = Some(started_at);
        task.retry_at = Some(deadline);
        self.store.update(task).await
    }

    async fn execute(
        &self,
        definition: &TaskDefinition,
        task: TaskDocument,
    ) -> Result<RunResult, RunFailure> {
        let ctx = self
            .middleware
            .before_run(RunContext::new(task))
            .await
            .map_err(|e| RunFailure::Middleware(e.to_string()))?;

        let mut runner = definition.create_runner(ctx);
        match tokio::time::timeout(definition.timeout, runner.run()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(RunFailure::Runner(e.to_string())),
            Err(_) => Err(RunFailure::TimedOut(definition.timeout)),
        }
    }

    fn on_success(
        &self,
        mut task: TaskDocument,
        result: RunResult,
        started_at: DateTime<Utc>,
    ) -> (WriteBack, TaskOutcome) {
        if let Some(state) = result.state {
            task.state = state;
        }

        let next_run = result.run_at.or_else(|| {
            task.interval
                .map(|interval| offset(started_at, interval.to_chrono()))
        });

        match next_run {
            Some(run_at) => {
                task.run_at = run_at;
                task.attempts = 0;
                task.release(TaskStatus::Idle);
                debug!(run_at = %run_at, "rescheduled task");
                (WriteBack::Update(task), TaskOutcome::Rescheduled { run_at })
            }
            None => {
                info!("task completed");
                (WriteBack::Delete(task.id), TaskOutcome::Completed)
            }
        }
    }

    fn on_failure(
        &self,
        mut task: TaskDocument,
        max_attempts: u32,
        failure: RunFailure,
    ) -> (WriteBack, TaskOutcome) {
        task.attempts = task.attempts.saturating_add(1);
        let attempts = task.attempts;

        if attempts >= max_attempts {
            task.release(TaskStatus::Failed);
            error!(attempts, max_attempts, error = %failure, "task failed with no attempts left");
            return (WriteBack::Update(task), TaskOutcome::Failed { attempts });
        }

        let run_at = offset(Utc::now(), self.retry.delay(attempts));
        task.run_at = run_at;
        task.release(TaskStatus::Idle);
        warn!(
            attempts,
            max_attempts,
            next_retry = %run_at,
            error = %failure,
            "task failed, scheduled retry"
        );
        (WriteBack::Update(task), TaskOutcome::Retried { attempts, run_at })
    }

    /// Persist the end of a run, retrying while the store is unavailable.
    async fn write_back(&self, write: WriteBack) -> Result<(), StoreError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(WRITE_BACK_MAX_ELAPSED),
            ..Default::default()
        };

        loop {
            let result = match &write {
                WriteBack::Update(doc) => self.store.update(doc.clone()).await.map(|_| ()),
                WriteBack::Delete(id) => self.store.delete(id).await,
            };

            match result {
                Ok(()) => return Ok(()),
                // Removed while it ran; nothing left to record.
                Err(StoreError::NotFound(id)) => {
                    debug!(id = %id, "task removed while running");
                    return Ok(());
                }
                Err(e) if e.is_transient() => match backoff.next_backoff() {
                    Some(wait) => {
                        warn!(error = %e, retry_in = ?wait, "task write-back failed, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("max_workers", &self.max_workers)
            .field("available", &self.available_workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use taskmill_store::{ClaimRequest, Interval, MemoryStore};

    fn config() -> TaskManagerConfig {
        TaskManagerConfig::new("node-a")
            .with_max_workers(2)
            .with_max_attempts(3)
            .with_retry_delays(Interval::minutes(5), Interval::hours(1))
    }

    fn pool_with(store: Arc<MemoryStore>, definitions: Vec<TaskDefinition>) -> TaskPool {
        let mut registry = TaskDefinitionRegistry::new();
        registry.register(definitions).unwrap();
        TaskPool::new(
            &config(),
            store,
            Arc::new(registry),
            Arc::new(MiddlewareChain::new()),
        )
    }

    async fn claim_one(store: &MemoryStore, request: TaskRequest) -> TaskDocument {
        store
            .create(request.into_document(Utc::now()))
            .await
            .unwrap();
        let now = Utc::now();
        let mut claimed = store
            .claim(&ClaimRequest {
                owner_id: "node-a".to_string(),
                size: 1,
                task_types: vec!["work".to_string()],
                now,
                claim_ownership_until: now + chrono::Duration::seconds(30),
            })
            .await
            .unwrap()
            .claimed;
        assert_eq!(claimed.len(), 1);
        claimed.remove(0)
    }

    #[tokio::test]
    async fn test_one_shot_success_deletes_task() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", |_| async {
                Ok(RunResult::new())
            })],
        );

        let task = claim_one(&store, TaskRequest::new("work").with_id("t1")).await;
        assert_eq!(pool.run_claimed(task).await, TaskOutcome::Completed);
        assert!(store.is_empty());
        assert_eq!(pool.stats().total_succeeded, 1);
    }

    #[tokio::test]
    async fn test_recurring_success_reschedules_and_keeps_state() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", |ctx: RunContext| async move {
                let runs = ctx.task.state["runs"].as_u64().unwrap_or(0);
                Ok(RunResult::new().with_state(json!({"runs": runs + 1})))
            })],
        );

        let mut task = claim_one(
            &store,
            TaskRequest::new("work")
                .with_id("t1")
                .with_interval(Interval::minutes(10)),
        )
        .await;
        task.attempts = 2;
        let task = store.update(task).await.unwrap();

        let before = Utc::now();
        let outcome = pool.run_claimed(task).await;
        let TaskOutcome::Rescheduled { run_at } = outcome else {
            panic!("expected reschedule, got {outcome:?}");
        };
        assert!(run_at >= before + chrono::Duration::minutes(10));

        let stored = store.get("t1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Idle);
        assert_eq!(stored.state, json!({"runs": 1}));
        assert_eq!(stored.attempts, 0);
        assert!(stored.owner_id.is_none());
        assert!(stored.retry_at.is_none());
    }

    #[tokio::test]
    async fn test_explicit_run_at_wins() {
        let store = Arc::new(MemoryStore::default());
        let next = Utc::now() + chrono::Duration::days(3);
        let pool = pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", move |_| async move {
                Ok(RunResult::new().with_run_at(next))
            })],
        );

        let task = claim_one(
            &store,
            TaskRequest::new("work")
                .with_id("t1")
                .with_interval(Interval::minutes(1)),
        )
        .await;
        assert_eq!(
            pool.run_claimed(task).await,
            TaskOutcome::Rescheduled { run_at: next }
        );
    }

    #[tokio::test]
    async fn test_failure_backs_off_then_goes_terminal() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", |_| async {
                Err("boom".into())
            })],
        );

        let task = claim_one(&store, TaskRequest::new("work").with_id("t1")).await;
        let before = Utc::now();
        let TaskOutcome::Retried { attempts, run_at } = pool.run_claimed(task).await else {
            panic!("expected retry");
        };
        assert_eq!(attempts, 1);
        assert!(run_at >= before + chrono::Duration::minutes(5));

        // Pretend the backoff elapsed, twice more.
        for expected in 2..=3u32 {
            let mut stored = store.get("t1").await.unwrap();
            stored.run_at = Utc::now();
            store.update(stored).await.unwrap();
            let now = Utc::now();
            let task = store
                .claim(&ClaimRequest {
                    owner_id: "node-a".to_string(),
                    size: 1,
                    task_types: vec!["work".to_string()],
                    now,
                    claim_ownership_until: now + chrono::Duration::seconds(30),
                })
                .await
                .unwrap()
                .claimed
                .remove(0);
            let outcome = pool.run_claimed(task).await;
            if expected < 3 {
                assert!(matches!(
                    outcome,
                    TaskOutcome::Retried { attempts, .. } if attempts == expected
                ));
            } else {
                assert_eq!(outcome, TaskOutcome::Failed { attempts: 3 });
            }
        }

        let stored = store.get("t1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert!(stored.owner_id.is_none());

        let stats = pool.stats();
        assert_eq!(stats.total_retried, 2);
        assert_eq!(stats.total_failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![
                TaskDefinition::from_fn("work", "Work", |_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(RunResult::new())
                })
                .with_timeout(Duration::from_millis(20)),
            ],
        );

        let task = claim_one(&store, TaskRequest::new("work").with_id("t1")).await;
        let outcome = pool.run_claimed(task).await;
        assert!(matches!(outcome, TaskOutcome::Retried { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_definition_max_attempts_overrides_default() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![
                TaskDefinition::from_fn("work", "Work", |_| async { Err("boom".into()) })
                    .with_max_attempts(1),
            ],
        );

        let task = claim_one(&store, TaskRequest::new("work").with_id("t1")).await;
        assert_eq!(
            pool.run_claimed(task).await,
            TaskOutcome::Failed { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_reclaimed_task_is_abandoned() {
        let store = Arc::new(MemoryStore::default());
        let pool = pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", |_| async {
                Ok(RunResult::new())
            })],
        );

        let task = claim_one(&store, TaskRequest::new("work").with_id("t1")).await;

        // Another owner bumps the version first.
        let mut other = store.get("t1").await.unwrap();
        other.owner_id = Some("node-b".to_string());
        store.update(other).await.unwrap();

        assert_eq!(pool.run_claimed(task).await, TaskOutcome::Abandoned);
        assert_eq!(
            store.get("t1").await.unwrap().owner_id.as_deref(),
            Some("node-b")
        );
    }

    #[tokio::test]
    async fn test_spawn_respects_slots_and_drain_waits() {
        let store = Arc::new(MemoryStore::default());
        let gate = Arc::new(tokio::sync::Notify::new());
        let runner_gate = Arc::clone(&gate);
        let pool = Arc::new(pool_with(
            Arc::clone(&store),
            vec![TaskDefinition::from_fn("work", "Work", move |_| {
                let gate = Arc::clone(&runner_gate);
                async move {
                    gate.notified().await;
                    Ok(RunResult::new())
                }
            })],
        ));

        let a = claim_one(&store, TaskRequest::new("work").with_id("a")).await;
        let b = claim_one(&store, TaskRequest::new("work").with_id("b")).await;
        let c = TaskDocument::new("c", "work", Utc::now());

        assert!(pool.spawn(a));
        assert!(pool.spawn(b));
        assert_eq!(pool.active_workers(), 2);
        assert!(!pool.spawn(c), "third task must not get a slot");

        gate.notify_waiters();
        // notify_waiters only wakes current waiters; keep nudging until both finish.
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while pool.available_workers() < 2 {
                gate.notify_waiters();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok());
        pool.drain().await;
        assert_eq!(pool.available_workers(), 2);
        assert!(store.is_empty());
    }
}
