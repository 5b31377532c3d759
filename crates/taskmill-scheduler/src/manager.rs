//! The task manager: lifecycle, pre-start queuing and the public API.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskmill_store::{FetchQuery, FetchResult, TaskDocument, TaskStore};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::operations::Operations;
use crate::queue::{PreStartQueue, QueuedRequest};
use crate::{
    ManagerStats, Middleware, MiddlewareChain, TaskDefinition, TaskDefinitionRegistry,
    TaskManagerConfig, TaskManagerError, TaskPool, TaskPoller, TaskRequest,
};

/// State shared by a started manager.
struct Running {
    ops: Arc<Operations>,
    pool: Arc<TaskPool>,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

enum Lifecycle {
    /// Definitions and middleware may still change; requests are buffered.
    NotStarted {
        registry: TaskDefinitionRegistry,
        middleware: MiddlewareChain,
        queue: PreStartQueue,
    },
    Started(Arc<Running>),
}

/// Where a request goes at the moment it is made.
enum Submitted<P, T> {
    Queued(oneshot::Receiver<Result<T, TaskManagerError>>),
    Ready(Arc<Operations>, P),
}

/// Schedules, claims and runs tasks stored in a shared [`TaskStore`].
///
/// Calls to [`schedule`](Self::schedule), [`ensure_scheduled`](Self::ensure_scheduled),
/// [`remove`](Self::remove) and [`fetch`](Self::fetch) made before
/// [`start`](Self::start) are buffered and executed, in the order they were
/// made, once it is called. Their futures resolve only then.
pub struct TaskManager {
    node_id: String,
    config: TaskManagerConfig,
    store: Arc<dyn TaskStore>,
    lifecycle: Mutex<Lifecycle>,
}

impl TaskManager {
    /// Create a manager. Fails if the configuration is invalid.
    pub fn new(
        config: TaskManagerConfig,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self, TaskManagerError> {
        let node_id = config.validate()?.to_string();
        Ok(Self {
            node_id,
            config,
            store,
            lifecycle: Mutex::new(Lifecycle::NotStarted {
                registry: TaskDefinitionRegistry::new(),
                middleware: MiddlewareChain::new(),
                queue: PreStartQueue::default(),
            }),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        matches!(&*self.lifecycle(), Lifecycle::Started(_))
    }

    /// Register task types. Only allowed before `start()`.
    pub fn register_task_definitions(
        &self,
        definitions: impl IntoIterator<Item = TaskDefinition>,
    ) -> Result<(), TaskManagerError> {
        match &mut *self.lifecycle() {
            Lifecycle::NotStarted { registry, .. } => {
                registry.register(definitions)?;
                debug!(registered = registry.len(), "registered task definitions");
                Ok(())
            }
            Lifecycle::Started(_) => {
                error!("task definitions registered after start");
                Err(TaskManagerError::DefinitionsAfterStart)
            }
        }
    }

    /// Append a middleware stage. Only allowed before `start()`.
    pub fn add_middleware(
        &self,
        middleware: impl Middleware + 'static,
    ) -> Result<(), TaskManagerError> {
        match &mut *self.lifecycle() {
            Lifecycle::NotStarted {
                middleware: chain, ..
            } => {
                chain.push(Arc::new(middleware));
                Ok(())
            }
            Lifecycle::Started(_) => {
                error!("middleware added after start");
                Err(TaskManagerError::MiddlewareAfterStart)
            }
        }
    }

    /// Route a request to the pre-start queue or hand back the live operations.
    fn submit<P, T>(
        &self,
        payload: P,
        enqueue: impl FnOnce(P, oneshot::Sender<Result<T, TaskManagerError>>) -> QueuedRequest,
    ) -> Submitted<P, T> {
        match &mut *self.lifecycle() {
            Lifecycle::NotStarted { queue, .. } => {
                let (reply, handle) = oneshot::channel();
                queue.push(enqueue(payload, reply));
                debug!(queued = queue.len(), "task manager not started, queued request");
                Submitted::Queued(handle)
            }
            Lifecycle::Started(running) => Submitted::Ready(Arc::clone(&running.ops), payload),
        }
    }

    /// Persist a new task.
    ///
    /// The request is routed when this is called, not when the future is
    /// first polled.
    pub fn schedule(
        &self,
        request: TaskRequest,
    ) -> impl Future<Output = Result<TaskDocument, TaskManagerError>> + Send + 'static {
        let submitted = self.submit(request, |request, reply| QueuedRequest::Schedule {
            request,
            reply,
        });
        async move {
            match submitted {
                Submitted::Queued(handle) => {
                    handle.await.map_err(|_| TaskManagerError::QueueClosed)?
                }
                Submitted::Ready(ops, request) => ops.schedule(request).await,
            }
        }
    }

    /// Schedule a task with a fixed id, or return the existing one.
    pub fn ensure_scheduled(
        &self,
        request: TaskRequest,
    ) -> impl Future<Output = Result<TaskDocument, TaskManagerError>> + Send + 'static {
        let submitted = self.submit(request, |request, reply| {
            QueuedRequest::EnsureScheduled { request, reply }
        });
        async move {
            match submitted {
                Submitted::Queued(handle) => {
                    handle.await.map_err(|_| TaskManagerError::QueueClosed)?
                }
                Submitted::Ready(ops, request) => ops.ensure_scheduled(request).await,
            }
        }
    }

    /// Delete a task by id.
    pub fn remove(
        &self,
        id: impl Into<String>,
    ) -> impl Future<Output = Result<(), TaskManagerError>> + Send + 'static {
        let submitted = self.submit(id.into(), |id, reply| QueuedRequest::Remove { id, reply });
        async move {
            match submitted {
                Submitted::Queued(handle) => {
                    handle.await.map_err(|_| TaskManagerError::QueueClosed)?
                }
                Submitted::Ready(ops, id) => ops.remove(&id).await,
            }
        }
    }

    /// Search stored tasks.
    pub fn fetch(
        &self,
        query: FetchQuery,
    ) -> impl Future<Output = Result<FetchResult, TaskManagerError>> + Send + 'static {
        let submitted = self.submit(query, |query, reply| QueuedRequest::Fetch { query, reply });
        async move {
            match submitted {
                Submitted::Queued(handle) => {
                    handle.await.map_err(|_| TaskManagerError::QueueClosed)?
                }
                Submitted::Ready(ops, query) => ops.fetch(&query).await,
            }
        }
    }

    /// Start claiming and running tasks.
    ///
    /// Freezes definitions and middleware, starts the poller, then executes
    /// buffered requests in order. Calling it again does nothing.
    ///
    /// Dropping the returned future part way through the flush leaves the
    /// manager polling. Requests not yet executed resolve with
    /// `QueueClosed`.
    pub async fn start(&self) {
        let (queue, running) = {
            let mut lifecycle = self.lifecycle();
            let Lifecycle::NotStarted {
                registry,
                middleware,
                queue,
            } = &mut *lifecycle
            else {
                debug!("task manager already started");
                return;
            };

            let registry = Arc::new(std::mem::take(registry));
            let middleware = Arc::new(std::mem::take(middleware));
            let queue = std::mem::take(queue);

            let ops = Arc::new(Operations::new(
                Arc::clone(&self.store),
                Arc::clone(&registry),
                Arc::clone(&middleware),
            ));
            let pool = Arc::new(TaskPool::new(
                &self.config,
                Arc::clone(&self.store),
                registry,
                middleware,
            ));
            let (shutdown_tx, _) = watch::channel(false);
            let running = Arc::new(Running {
                ops,
                pool,
                shutdown_tx,
                poller: Mutex::new(None),
            });

            *lifecycle = Lifecycle::Started(Arc::clone(&running));
            (queue, running)
        };

        info!(
            node_id = %self.node_id,
            index = %self.config.index,
            max_workers = self.config.max_workers,
            poll_interval = %self.config.poll_interval,
            task_types = ?running.pool.task_types(),
            "starting task manager"
        );

        let poller = TaskPoller::new(
            self.node_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&running.pool),
            self.config.claim_ownership,
        );
        let handle = tokio::spawn(poller.run(
            self.config.poll_interval.to_std(),
            running.shutdown_tx.subscribe(),
        ));
        *running
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let flushed = queue.flush(&running.ops).await;
        if flushed > 0 {
            info!(flushed, "executed requests queued before start");
        }
    }

    /// Stop polling and wait for in-flight tasks to finish.
    ///
    /// Does nothing if the manager was never started.
    pub async fn stop(&self) {
        let running = match &*self.lifecycle() {
            Lifecycle::Started(running) => Arc::clone(running),
            Lifecycle::NotStarted { .. } => return,
        };

        info!(node_id = %self.node_id, "stopping task manager");
        let _ = running.shutdown_tx.send(true);

        let poller = running
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!(error = %e, "task poller exited abnormally");
            }
        }

        running.pool.drain().await;
        info!(node_id = %self.node_id, "task manager stopped");
    }

    pub fn stats(&self) -> ManagerStats {
        match &*self.lifecycle() {
            Lifecycle::NotStarted { queue, .. } => ManagerStats {
                queued_requests: queue.len(),
                max_workers: self.config.max_workers,
                ..Default::default()
            },
            Lifecycle::Started(running) => running.pool.stats(),
        }
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("node_id", &self.node_id)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
