//! Requests buffered until the task manager starts.

use std::collections::VecDeque;

use taskmill_store::{FetchQuery, FetchResult, TaskDocument};
use tokio::sync::oneshot;
use tracing::debug;

use crate::operations::Operations;
use crate::{TaskManagerError, TaskRequest};

type Reply<T> = oneshot::Sender<Result<T, TaskManagerError>>;

/// An operation issued before `start()`, with the handle its caller awaits.
pub(crate) enum QueuedRequest {
    Schedule {
        request: TaskRequest,
        reply: Reply<TaskDocument>,
    },
    EnsureScheduled {
        request: TaskRequest,
        reply: Reply<TaskDocument>,
    },
    Remove {
        id: String,
        reply: Reply<()>,
    },
    Fetch {
        query: FetchQuery,
        reply: Reply<FetchResult>,
    },
}

impl QueuedRequest {
    fn kind(&self) -> &'static str {
        match self {
            QueuedRequest::Schedule { .. } => "schedule",
            QueuedRequest::EnsureScheduled { .. } => "ensure_scheduled",
            QueuedRequest::Remove { .. } => "remove",
            QueuedRequest::Fetch { .. } => "fetch",
        }
    }

    /// Run against the store and resolve the caller's handle.
    ///
    /// A caller that stopped waiting is not an error; its result is dropped.
    pub(crate) async fn execute(self, ops: &Operations) {
        debug!(kind = self.kind(), "executing queued request");
        match self {
            QueuedRequest::Schedule { request, reply } => {
                let _ = reply.send(ops.schedule(request).await);
            }
            QueuedRequest::EnsureScheduled { request, reply } => {
                let _ = reply.send(ops.ensure_scheduled(request).await);
            }
            QueuedRequest::Remove { id, reply } => {
                let _ = reply.send(ops.remove(&id).await);
            }
            QueuedRequest::Fetch { query, reply } => {
                let _ = reply.send(ops.fetch(&query).await);
            }
        }
    }
}

/// FIFO buffer of requests made before `start()`.
#[derive(Default)]
pub(crate) struct PreStartQueue {
    requests: VecDeque<QueuedRequest>,
}

impl PreStartQueue {
    pub(crate) fn push(&mut self, request: QueuedRequest) {
        self.requests.push_back(request);
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    /// Execute every buffered request in the order it was issued.
    pub(crate) async fn flush(self, ops: &Operations) -> usize {
        let count = self.requests.len();
        for request in self.requests {
            request.execute(ops).await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{MiddlewareChain, RunResult, TaskDefinition, TaskDefinitionRegistry};
    use taskmill_store::{MemoryStore, TaskStore};

    fn operations(store: Arc<MemoryStore>) -> Operations {
        let mut registry = TaskDefinitionRegistry::new();
        registry
            .register([TaskDefinition::from_fn("report", "Report", |_| async {
                Ok(RunResult::new())
            })])
            .unwrap();
        Operations::new(store, Arc::new(registry), Arc::new(MiddlewareChain::new()))
    }

    #[tokio::test]
    async fn test_flush_resolves_in_order() {
        let store = Arc::new(MemoryStore::default());
        let ops = operations(Arc::clone(&store));
        let mut queue = PreStartQueue::default();

        let (schedule_tx, schedule_rx) = oneshot::channel();
        queue.push(QueuedRequest::Schedule {
            request: TaskRequest::new("report").with_id("a"),
            reply: schedule_tx,
        });
        let (remove_tx, remove_rx) = oneshot::channel();
        queue.push(QueuedRequest::Remove {
            id: "a".to_string(),
            reply: remove_tx,
        });
        let (fetch_tx, fetch_rx) = oneshot::channel();
        queue.push(QueuedRequest::Fetch {
            query: FetchQuery::new(),
            reply: fetch_tx,
        });
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush(&ops).await, 3);

        assert_eq!(schedule_rx.await.unwrap().unwrap().id, "a");
        remove_rx.await.unwrap().unwrap();
        // The fetch ran after the remove.
        assert_eq!(fetch_rx.await.unwrap().unwrap().total, 0);
        assert!(store.get("a").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_request_resolves_with_error() {
        let store = Arc::new(MemoryStore::default());
        let ops = operations(store);
        let mut queue = PreStartQueue::default();

        let (tx, rx) = oneshot::channel();
        queue.push(QueuedRequest::Remove {
            id: "missing".to_string(),
            reply: tx,
        });
        queue.flush(&ops).await;

        assert!(matches!(
            rx.await.unwrap(),
            Err(TaskManagerError::Store(_))
        ));
    }
}
