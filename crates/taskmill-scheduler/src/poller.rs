//! The claim-and-poll loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskmill_store::{ClaimRequest, ClaimResult, Interval, StoreError, TaskStore};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::TaskPool;
use crate::types::offset;

/// Claim up to `available_workers` tasks, or nothing if no worker is free.
///
/// Returns `Ok(None)` without calling `claim` when `available_workers` is
/// zero.
pub async fn claim_available_tasks<F, Fut>(
    claim: F,
    available_workers: usize,
) -> Result<Option<ClaimResult>, StoreError>
where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<ClaimResult, StoreError>>,
{
    if available_workers == 0 {
        debug!("all workers are busy, skipping claim");
        return Ok(None);
    }
    claim(available_workers).await.map(Some)
}

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No free worker; the store was not queried.
    Skipped,
    /// This many tasks were claimed and handed to the pool.
    Claimed(usize),
    /// The claim failed; the next tick tries again.
    Failed,
}

/// Periodically claims due tasks for this node and hands them to the pool.
pub struct TaskPoller {
    node_id: String,
    store: Arc<dyn TaskStore>,
    pool: Arc<TaskPool>,
    task_types: Vec<String>,
    claim_ownership: chrono::Duration,
}

impl TaskPoller {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        pool: Arc<TaskPool>,
        claim_ownership: Interval,
    ) -> Self {
        let task_types = pool.task_types();
        Self {
            node_id: node_id.into(),
            store,
            pool,
            task_types,
            claim_ownership: claim_ownership.to_chrono(),
        }
    }

    /// Claim as many tasks as there are free workers and start them.
    pub async fn tick(&self) -> TickOutcome {
        let available = self.pool.available_workers();
        let now = Utc::now();
        let request = |size| ClaimRequest {
            owner_id: self.node_id.clone(),
            size,
            task_types: self.task_types.clone(),
            now,
            claim_ownership_until: offset(now, self.claim_ownership),
        };

        let claimed = claim_available_tasks(
            |size| {
                let request = request(size);
                async move { self.store.claim(&request).await }
            },
            available,
        )
        .await;

        match claimed {
            Ok(None) => TickOutcome::Skipped,
            Ok(Some(result)) => {
                let count = result.claimed_count();
                if count > 0 {
                    info!(claimed = count, available, "claimed tasks");
                } else {
                    debug!(available, "no tasks due");
                }
                self.pool.record_claimed(count);
                for task in result.claimed {
                    self.pool.spawn(task);
                }
                TickOutcome::Claimed(count)
            }
            Err(e) => {
                warn!(error = %e, "failed to claim tasks");
                TickOutcome::Failed
            }
        }
    }

    /// Poll every `poll_interval` until `shutdown_rx` turns true.
    ///
    /// The first poll happens immediately. A slow tick delays the next one
    /// rather than triggering a burst.
    pub async fn run(self, poll_interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!(node_id = %self.node_id, task_types = ?self.task_types, "task poller starting");

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(node_id = %self.node_id, "task poller stopped");
    }
}
